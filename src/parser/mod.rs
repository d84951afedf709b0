pub mod product;

pub use product::{ProductExtractor, ProductInfo, PRICE_CURRENCY_SYMBOL};
