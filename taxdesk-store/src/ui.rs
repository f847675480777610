//! Interface preferences store

use crate::store::{PersistedState, PersistedStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use taxdesk_core::TaxdeskResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
            Theme::System => write!(f, "system"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            _ => Err(format!("Unknown theme: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub sidebar_collapsed: bool,
    pub theme: Theme,
    pub language: String,
    pub page_size: u32,
    /// Open dialog, if any; not restored after a restart
    pub active_modal: Option<String>,
    pub toast: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            sidebar_collapsed: false,
            theme: Theme::System,
            language: "en".to_string(),
            page_size: 25,
            active_modal: None,
            toast: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiPersisted {
    pub sidebar_collapsed: bool,
    pub theme: Theme,
    pub language: String,
    pub page_size: u32,
}

impl PersistedState for UiState {
    const STORAGE_KEY: &'static str = "ui-storage";
    type Persisted = UiPersisted;

    fn partialize(&self) -> UiPersisted {
        UiPersisted {
            sidebar_collapsed: self.sidebar_collapsed,
            theme: self.theme,
            language: self.language.clone(),
            page_size: self.page_size,
        }
    }

    fn merge_persisted(&mut self, persisted: UiPersisted) {
        self.sidebar_collapsed = persisted.sidebar_collapsed;
        self.theme = persisted.theme;
        self.language = persisted.language;
        // A zero page size would break every table
        if persisted.page_size > 0 {
            self.page_size = persisted.page_size;
        }
    }
}

pub type UiStore = PersistedStore<UiState>;

impl PersistedStore<UiState> {
    pub async fn toggle_sidebar(&self) -> TaxdeskResult<()> {
        self.set(|state| state.sidebar_collapsed = !state.sidebar_collapsed)
            .await
    }

    pub async fn set_theme(&self, theme: Theme) -> TaxdeskResult<()> {
        self.set(|state| state.theme = theme).await
    }
}
