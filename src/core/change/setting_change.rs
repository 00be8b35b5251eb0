// src/core/change/setting_change.rs

//! A single set/unset of one setting at one applicability.

use crate::core::NomadError;
use crate::core::model::applicability::Applicability;
use crate::core::model::cluster::Cluster;
use crate::core::model::setting::{Mutability, Setting};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingOperation {
    Set,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SettingChange {
    pub applicability: Applicability,
    pub setting: Setting,
    pub operation: SettingOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl SettingChange {
    pub fn set(
        applicability: Applicability,
        setting: Setting,
        key: Option<&str>,
        value: &str,
    ) -> Self {
        Self {
            applicability,
            setting,
            operation: SettingOperation::Set,
            key: key.map(str::to_string),
            value: Some(value.to_string()),
        }
    }

    pub fn unset(applicability: Applicability, setting: Setting, key: Option<&str>) -> Self {
        Self {
            applicability,
            setting,
            operation: SettingOperation::Unset,
            key: key.map(str::to_string),
            value: None,
        }
    }

    pub fn can_apply(&self, cluster: &Cluster) -> Result<(), NomadError> {
        self.apply(cluster).map(|_| ())
    }

    /// Applies this change to a copy of the cluster. Pure: no I/O, no
    /// dependence on ambient state.
    pub fn apply(&self, cluster: &Cluster) -> Result<Cluster, NomadError> {
        if self.setting.mutability() == Mutability::ConfigurationOnly {
            return Err(NomadError::ChangeUnapplicable(format!(
                "Setting '{}' cannot be changed once the cluster is activated",
                self.setting
            )));
        }
        let mut next = cluster.clone();
        match self.operation {
            SettingOperation::Set => {
                let value = self.value.as_deref().ok_or_else(|| {
                    NomadError::InvalidInput(format!(
                        "Setting '{}' requires a value",
                        self.setting
                    ))
                })?;
                self.setting
                    .apply_set(&mut next, &self.applicability, self.key.as_deref(), value)?;
            }
            SettingOperation::Unset => {
                self.setting
                    .apply_unset(&mut next, &self.applicability, self.key.as_deref())?;
            }
        }
        Ok(next)
    }

    pub fn summary(&self) -> String {
        let operand = match (&self.key, &self.value) {
            (Some(k), Some(v)) => format!("{}.{k}={v}", self.setting),
            (Some(k), None) => format!("{}.{k}", self.setting),
            (None, Some(v)) => format!("{}={v}", self.setting),
            (None, None) => self.setting.to_string(),
        };
        match self.operation {
            SettingOperation::Set => format!("set {operand} on {}", self.applicability),
            SettingOperation::Unset => format!("unset {operand} on {}", self.applicability),
        }
    }
}
