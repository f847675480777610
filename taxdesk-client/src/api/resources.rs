//! REST collections exposed by the CRM API

use crate::client::AuthenticatedClient;
use crate::transport::ApiRequest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use taxdesk_core::{ErrorContext, TaxdeskError, TaxdeskResult};
use tracing::debug;

/// A collection under the API root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Contacts,
    Cases,
    Corporations,
    Documents,
    Messages,
    Appointments,
    Reports,
    Notifications,
    Users,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Contacts,
        ResourceKind::Cases,
        ResourceKind::Corporations,
        ResourceKind::Documents,
        ResourceKind::Messages,
        ResourceKind::Appointments,
        ResourceKind::Reports,
        ResourceKind::Notifications,
        ResourceKind::Users,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Contacts => "contacts",
            ResourceKind::Cases => "cases",
            ResourceKind::Corporations => "corporations",
            ResourceKind::Documents => "documents",
            ResourceKind::Messages => "messages",
            ResourceKind::Appointments => "appointments",
            ResourceKind::Reports => "reports",
            ResourceKind::Notifications => "notifications",
            ResourceKind::Users => "users",
        }
    }

    /// Collection path, e.g. `/contacts/`
    pub fn path(&self) -> String {
        format!("/{}/", self.name())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = TaxdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_matches('/').to_ascii_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| TaxdeskError::Validation {
                message: format!("Unknown resource '{}'", s),
                status: None,
                field: Some("resource".to_string()),
                errors: None,
                context: ErrorContext::new("resources").with_suggestion(
                    "Use one of: contacts, cases, corporations, documents, messages, \
                     appointments, reports, notifications, users",
                ),
            })
    }
}

/// Query parameters for collection listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub filters: Vec<(String, String)>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn ordering(mut self, ordering: impl Into<String>) -> Self {
        self.ordering = Some(ordering.into());
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(page) = self.page {
            query.push(("page".to_string(), page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            query.push(("page_size".to_string(), page_size.to_string()));
        }
        if let Some(search) = self.search.as_ref().filter(|s| !s.is_empty()) {
            query.push(("search".to_string(), search.clone()));
        }
        if let Some(ordering) = &self.ordering {
            query.push(("ordering".to_string(), ordering.clone()));
        }
        query.extend(self.filters.iter().cloned());
        query
    }
}

/// One page of a collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageRepr<T> {
    Paginated {
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        previous: Option<String>,
        results: Vec<T>,
    },
    Bare(Vec<T>),
}

// Unpaginated endpoints answer with a bare array
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Page<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PageRepr::deserialize(deserializer)? {
            PageRepr::Paginated {
                count,
                next,
                previous,
                results,
            } => Page {
                count: count.unwrap_or(results.len() as u64),
                next,
                previous,
                results,
            },
            PageRepr::Bare(results) => Page {
                count: results.len() as u64,
                next: None,
                previous: None,
                results,
            },
        })
    }
}

/// Typed CRUD over one collection
pub struct ResourceClient<T> {
    client: Arc<AuthenticatedClient>,
    kind: ResourceKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            kind: self.kind,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> ResourceClient<T> {
    pub fn new(client: Arc<AuthenticatedClient>, kind: ResourceKind) -> Self {
        Self {
            client,
            kind,
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn item_path(&self, id: &str) -> TaxdeskResult<String> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '?', '#']) {
            return Err(TaxdeskError::Validation {
                message: format!("Invalid {} id '{}'", self.kind, id),
                status: None,
                field: Some("id".to_string()),
                errors: None,
                context: ErrorContext::new("resources").with_operation("item_path"),
            });
        }
        Ok(format!("{}{}/", self.kind.path(), id))
    }

    pub async fn list(&self, params: &ListParams) -> TaxdeskResult<Page<T>> {
        debug!(resource = %self.kind, "Listing");
        self.client
            .get_json_with_query(&self.kind.path(), params.to_query())
            .await
    }

    pub async fn get(&self, id: &str) -> TaxdeskResult<T> {
        let path = self.item_path(id)?;
        self.client.get_json(&path).await
    }

    pub async fn create<B: Serialize + Sync + ?Sized>(&self, body: &B) -> TaxdeskResult<T> {
        self.client.post_json(&self.kind.path(), body).await
    }

    /// Partial update
    pub async fn update<B: Serialize + Sync + ?Sized>(&self, id: &str, patch: &B) -> TaxdeskResult<T> {
        let path = self.item_path(id)?;
        self.client.patch_json(&path, patch).await
    }

    pub async fn delete(&self, id: &str) -> TaxdeskResult<()> {
        let path = self.item_path(id)?;
        self.client.delete(&path).await
    }
}

/// Notification extras on top of the plain collection
pub struct NotificationsApi {
    client: Arc<AuthenticatedClient>,
}

/// The server has used all three names for the counter
#[derive(Debug, Default, Deserialize)]
struct UnreadCount {
    #[serde(default)]
    unread: Option<u64>,
    #[serde(default)]
    unread_count: Option<u64>,
    #[serde(default)]
    count: Option<u64>,
}

impl UnreadCount {
    fn value(&self) -> Option<u64> {
        self.unread.or(self.unread_count).or(self.count)
    }
}

impl NotificationsApi {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }

    pub fn collection<T: DeserializeOwned>(&self) -> ResourceClient<T> {
        ResourceClient::new(self.client.clone(), ResourceKind::Notifications)
    }

    pub async fn unread_count(&self) -> TaxdeskResult<u64> {
        let path = format!("{}unread-count/", ResourceKind::Notifications.path());
        let count: UnreadCount = self.client.get_json(&path).await?;
        count.value().ok_or_else(|| {
            taxdesk_core::internal_error!("Unread count missing from response", "notifications_api")
        })
    }

    pub async fn mark_read(&self, id: &str) -> TaxdeskResult<()> {
        let path = self
            .collection::<serde_json::Value>()
            .item_path(id)
            .map(|item| format!("{}mark-read/", item))?;
        self.client.request(ApiRequest::post(path)).await?;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> TaxdeskResult<()> {
        let path = format!("{}mark-all-read/", ResourceKind::Notifications.path());
        self.client.request(ApiRequest::post(path)).await?;
        Ok(())
    }
}
