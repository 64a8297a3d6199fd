//! Error-injection hooks (feature: `failpoints`).
//!
//! `fail_point!("name")` returns an internal error from the enclosing
//! function when `name` is listed in the comma-separated `DOCQL_FAILPOINTS`
//! variable. Without the feature the macro expands to nothing.

#[cfg(feature = "failpoints")]
pub fn armed(name: &str) -> bool {
    std::env::var("DOCQL_FAILPOINTS")
        .map(|list| list.split(',').any(|p| p.trim() == name))
        .unwrap_or(false)
}

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        if $crate::failpoints::armed($name) {
            return Err(docql_core::error::Error::invariant(format!(
                "failpoint triggered: {}",
                $name
            )));
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {
        let _ = $name;
    };
}
