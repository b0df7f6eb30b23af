use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::registry::ReadinessCheck;

/// Upper bound on a single component probe, retries included.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize)]
pub struct ComponentReadiness {
    pub name: &'static str,
    pub status: String,
    #[serde(skip)]
    pub ready: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub components: Vec<ComponentReadiness>,
}

impl Readiness {
    pub fn from_components(components: Vec<ComponentReadiness>) -> Self {
        Self {
            ready: components.iter().all(|c| c.ready),
            components,
        }
    }
}

pub(crate) async fn check<C>(component: &C, cancel: &CancellationToken) -> ComponentReadiness
where
    C: ReadinessCheck + ?Sized,
{
    let name = component.name();
    match tokio::time::timeout(PROBE_TIMEOUT, component.probe(cancel)).await {
        Ok(Ok(())) => ComponentReadiness {
            name,
            status: String::from("ok"),
            ready: true,
        },
        Ok(Err(e)) => {
            tracing::warn!("readiness probe for {name} failed: {e}");
            ComponentReadiness {
                name,
                status: e.to_string(),
                ready: false,
            }
        }
        Err(_) => {
            tracing::warn!("readiness probe for {name} timed out");
            ComponentReadiness {
                name,
                status: String::from("probe timed out"),
                ready: false,
            }
        }
    }
}
