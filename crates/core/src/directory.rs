//! Container directory
//!
//! Lists containers for the interactive table and resolves the exact-name
//! filter of the batch mode.

use crate::docker::{ContainerSummary, Docker};
use crate::errors::{EnvPatchError, Result, RuntimeResult};
use tracing::{debug, instrument};

/// List all containers, running or not, optionally restricted to an exact name
#[instrument(skip(docker))]
pub async fn list<D>(docker: &D, name_filter: Option<&str>) -> RuntimeResult<Vec<ContainerSummary>>
where
    D: Docker + ?Sized,
{
    let containers = docker.list_containers(name_filter).await?;
    debug!("Directory lists {} container(s)", containers.len());
    Ok(containers)
}

/// Resolve a name to the containers carrying it.
///
/// Fails with [`EnvPatchError::NoMatchingContainers`] when nothing matches.
#[instrument(skip(docker))]
pub async fn resolve<D>(docker: &D, name: &str) -> Result<Vec<ContainerSummary>>
where
    D: Docker + ?Sized,
{
    let matches = list(docker, Some(name)).await?;
    if matches.is_empty() {
        return Err(EnvPatchError::NoMatchingContainers {
            filter: name.to_string(),
        });
    }
    Ok(matches)
}

/// Replace the id of a listed container after it was recreated
pub fn replace_id(rows: &mut [ContainerSummary], old_id: &str, new_id: &str) -> Option<usize> {
    let index = rows.iter().position(|row| row.id == old_id)?;
    rows[index].id = new_id.to_string();
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::{MockContainer, MockDocker};

    fn docker() -> MockDocker {
        MockDocker::with_containers(vec![
            MockContainer::new("a1", "web"),
            MockContainer::new("b2", "web-worker").stopped(),
            MockContainer::new("c3", "db"),
        ])
    }

    #[tokio::test]
    async fn test_list_includes_stopped_containers() {
        let rows = list(&docker(), None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r.state == "exited"));
    }

    #[tokio::test]
    async fn test_resolve_is_exact() {
        let rows = resolve(&docker(), "web").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a1");
    }

    #[tokio::test]
    async fn test_resolve_without_match() {
        let err = resolve(&docker(), "cache").await.unwrap_err();
        assert!(matches!(
            err,
            EnvPatchError::NoMatchingContainers { ref filter } if filter == "cache"
        ));
    }

    #[tokio::test]
    async fn test_replace_id_keeps_row_position() {
        let mut rows = list(&docker(), None).await.unwrap();
        assert_eq!(replace_id(&mut rows, "b2", "z9"), Some(1));
        assert_eq!(rows[1].id, "z9");
        assert_eq!(rows[1].names, vec!["web-worker"]);
        assert_eq!(replace_id(&mut rows, "missing", "x"), None);
    }
}
