pub(crate) mod audit;
pub(crate) mod config;
pub(crate) mod lifecycle;
pub(crate) mod reconcile;
pub(crate) mod runtime;
pub(crate) mod tooling;

#[cfg(test)]
pub(crate) mod test_support;
