pub mod backtest;
pub mod controller;
pub mod engine;
pub mod fill_model;
pub mod ledger;
pub mod market_data;
pub mod sizing;
