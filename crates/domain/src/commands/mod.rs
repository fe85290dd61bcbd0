pub mod stock_commands;
