pub mod allocator;
pub mod broadcast;
pub mod checkin;
pub mod circuit_breaker;
pub mod cleanup;
pub mod ledger;
pub mod notifications;
pub mod tokens;

#[cfg(test)]
pub mod test_support;
