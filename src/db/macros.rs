//! Data source dispatch macros.
//!
//! [`AnySource`](crate::db::AnySource) wraps one concrete adapter per dialect;
//! these macros expand the repetitive `match` over its variants.

/// Macro for generating data source dispatch match arms.
///
/// Every arm binds the concrete adapter to the same identifier and evaluates
/// the same body, so the body must type-check against each adapter.
///
/// # Example
///
/// ```ignore
/// impl_source_dispatch!(self, source => source.execute_raw_sql(sql).await)
/// ```
#[macro_export]
macro_rules! impl_source_dispatch {
    ($any:expr, $s:ident => $body:expr) => {
        match $any {
            $crate::db::source::AnySource::MySql($s) => $body,
            $crate::db::source::AnySource::Postgres($s) => $body,
            $crate::db::source::AnySource::Sqlite($s) => $body,
            $crate::db::source::AnySource::DuckDb($s) => $body,
        }
    };
}

pub use impl_source_dispatch;
