//! CRD generation and installation
//!
//! The controller installs its own CRDs on startup using server-side apply,
//! so the schemas always match the binary.

use chaos_common::crd::{
    AWSChaos, ChaosKind, GCPChaos, HTTPChaos, IOChaos, KernelChaos, NetworkChaos, PodChaos,
    StressChaos, TimeChaos,
};
use chaos_common::retry::{retry_with_backoff, RetryConfig};
use chaos_common::FIELD_MANAGER;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

/// CRD definition with its kind
pub struct CrdDef {
    /// Experiment kind
    pub kind: ChaosKind,
    /// Generated definition
    pub crd: CustomResourceDefinition,
}

/// Every experiment CRD, in kind order
pub fn all_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            kind: ChaosKind::PodChaos,
            crd: PodChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::NetworkChaos,
            crd: NetworkChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::IOChaos,
            crd: IOChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::StressChaos,
            crd: StressChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::HTTPChaos,
            crd: HTTPChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::KernelChaos,
            crd: KernelChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::TimeChaos,
            crd: TimeChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::AWSChaos,
            crd: AWSChaos::crd(),
        },
        CrdDef {
            kind: ChaosKind::GCPChaos,
            crd: GCPChaos::crd(),
        },
    ]
}

/// Every CRD as one multi-document YAML stream
pub fn crds_yaml() -> Result<String, serde_yaml::Error> {
    let docs = all_crds()
        .iter()
        .map(|def| serde_yaml::to_string(&def.crd))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// Attempts per CRD before startup gives up
pub const CRD_INSTALL_ATTEMPTS: u32 = 5;

/// Install or update every CRD using server-side apply, retrying each
/// with backoff
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::with_max_attempts(CRD_INSTALL_ATTEMPTS);

    for def in all_crds() {
        let name = def.kind.crd_name();
        tracing::info!("Installing {} CRD...", name);
        let patch = Patch::Apply(&def.crd);
        let (crds, params, patch, crd_name) = (&api, &params, &patch, name.as_str());
        retry_with_backoff(&retry, &format!("install {name} CRD"), move || {
            crds.patch(crd_name, params, patch)
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All chaos CRDs installed/updated");
    Ok(())
}
