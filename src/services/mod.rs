pub mod catalog;
pub mod coordination;
pub mod ledger;
pub mod locks;
pub mod notify;
pub mod pricing;
pub mod safety;
pub mod split;
pub mod storage;
pub mod trips;
