use crate::error::LocatorError;
use crate::storage::ObjectStore;
use tracing::info;

/// A container resolved from its name prefix for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub container_prefix: String,
    pub resolved_container: String,
}

/// Finds the container whose name starts with `prefix`.
///
/// The first match in listing order wins; the listing is not sorted, so two
/// containers sharing the prefix resolve to whichever the store lists first.
/// Containers are never created here.
pub async fn resolve(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<StorageLocation, LocatorError> {
    let containers = store.list_containers().await?;
    let resolved = containers
        .into_iter()
        .find(|name| name.starts_with(prefix))
        .ok_or_else(|| LocatorError::NoMatchingContainer {
            prefix: prefix.to_string(),
        })?;
    info!("Resolved bucket {} for prefix {}", resolved, prefix);
    Ok(StorageLocation {
        container_prefix: prefix.to_string(),
        resolved_container: resolved,
    })
}
