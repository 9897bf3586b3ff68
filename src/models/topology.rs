//! Declarative resource definitions handed to the external provisioning
//! engine.
//!
//! These are plain configuration objects. Diffing them against live state and
//! applying changes is the engine's job; this crate only renders them, with
//! the run-from-package setting filled in once a package has been published.

use crate::config::AppConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// App setting the hosting platform reads to fetch and run a package.
pub const RUN_FROM_PACKAGE_SETTING: &str = "WEBSITE_RUN_FROM_PACKAGE";

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub resource_group_name: String,
    pub location: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Sku {
    pub tier: String,
    pub name: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppServicePlan {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub sku: Sku,
    pub kind: String,
    /// Must be true for Linux plans.
    pub reserved: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub linux_fx_version: String,
    pub app_settings: BTreeMap<String, String>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebApp {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    /// Name of the `AppServicePlan` hosting this app.
    pub server_farm: String,
    pub https_only: bool,
    pub site_config: SiteConfig,
}

impl WebApp {
    pub fn default_host_name(&self) -> String {
        format!("{}.azurewebsites.net", self.name)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccount {
    pub account_name: String,
    pub resource_group_name: String,
    pub location: String,
    pub kind: String,
    pub sku: Sku,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlobContainer {
    pub container_name: String,
    pub account_name: String,
    pub resource_group_name: String,
    pub public_access: String,
}

/// The full set of resources a deployment declares.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub resource_group: ResourceGroup,
    pub app_service_plan: AppServicePlan,
    pub web_app: WebApp,
    pub storage_account: StorageAccount,
    pub blob_container: BlobContainer,
}

impl Topology {
    /// Describe the free-tier Linux Python web app plus the storage that
    /// holds its packages.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let rg = cfg.resource_group.clone();
        let location = cfg.location.clone();
        let plan_name = format!("{}-plan", cfg.web_app_name);

        Self {
            resource_group: ResourceGroup {
                resource_group_name: rg.clone(),
                location: location.clone(),
            },
            app_service_plan: AppServicePlan {
                name: plan_name.clone(),
                resource_group_name: rg.clone(),
                location: location.clone(),
                sku: Sku {
                    tier: "Free".into(),
                    name: "F1".into(),
                },
                kind: "linux".into(),
                reserved: true,
            },
            web_app: WebApp {
                name: cfg.web_app_name.clone(),
                resource_group_name: rg.clone(),
                location: location.clone(),
                server_farm: plan_name,
                https_only: true,
                site_config: SiteConfig {
                    linux_fx_version: cfg.linux_fx_version.clone(),
                    app_settings: BTreeMap::new(),
                },
            },
            storage_account: StorageAccount {
                account_name: cfg.account_name.clone(),
                resource_group_name: rg.clone(),
                location,
                kind: "StorageV2".into(),
                sku: Sku {
                    tier: "Standard".into(),
                    name: "Standard_LRS".into(),
                },
            },
            blob_container: BlobContainer {
                container_name: cfg.container.clone(),
                account_name: cfg.account_name.clone(),
                resource_group_name: rg,
                public_access: "None".into(),
            },
        }
    }

    /// Point the web app at a published package.
    pub fn with_package_url(mut self, signed_url: &str) -> Self {
        self.web_app
            .site_config
            .app_settings
            .insert(RUN_FROM_PACKAGE_SETTING.into(), signed_url.to_string());
        self
    }

    /// Exported URL of the web app.
    pub fn web_app_url(&self) -> String {
        format!("https://{}", self.web_app.default_host_name())
    }
}
