//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` for a cloneable field so handlers can
/// extract it directly with `State<T>`.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<dyn Store>, store);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<dyn Store> {
///     fn from_ref(state: &AppState) -> Self {
///         state.store.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
