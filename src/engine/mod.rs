// Paw Ledger — Engine Layer
// Everything that does I/O or holds state: the SQLite store, the ledger
// caches and search, and configuration loading.

pub mod config;
pub mod ledger;
pub mod store;
