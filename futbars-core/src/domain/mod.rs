//! Domain types: contracts and bars.

pub mod bar;
pub mod contract;

pub use bar::{
    earliest, format_cursor, latest, next_cursor, parse_cursor, Bar, BarSize, TaggedBar,
    WhatToShow, CSV_DATE_FORMAT, CURSOR_FORMAT,
};
pub use contract::{
    derive_local_symbol, is_contract_of, parse_expiry, Contract, ContractDetails,
    ContractTemplate, ExpiryParseError,
};
