pub mod decimal_quantity;
pub mod string_or_native;
