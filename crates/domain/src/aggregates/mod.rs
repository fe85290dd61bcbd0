pub mod inventory;
pub mod product_stock;
pub mod reservation;
