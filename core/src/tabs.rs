//! Service-keyed tab ownership.
//!
//! Tabs are the shared resource: only the orchestrator mutates this map.
//! Tabs outlive sessions and are reused; per-session exclusivity comes
//! from the orchestrator's one-live-session-per-service queue, not from
//! this map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use wildmatch::WildMatch;

use crate::browser::Browser;
use crate::browser::BrowserError;
use crate::browser::Tab;
use crate::service_descriptor::ServiceDescriptor;

pub struct TabManager {
    browser: Arc<dyn Browser>,
    tabs: Mutex<HashMap<String, Arc<dyn Tab>>>,
}

impl TabManager {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self {
            browser,
            tabs: Mutex::new(HashMap::new()),
        }
    }

    /// The tab for a service: the one already owned if still alive, an
    /// existing browser tab at the right origin, or a newly opened one.
    /// An owned tab that wandered off-origin is navigated back to the
    /// launch URL; an on-origin tab is left where it is.
    pub async fn acquire(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Arc<dyn Tab>, BrowserError> {
        let mut tabs = self.tabs.lock().await;

        if let Some(tab) = tabs.get(&descriptor.id) {
            if tab.is_alive() {
                let matcher = WildMatch::new(&descriptor.origin_pattern);
                if !matcher.matches(&tab.current_url().await) {
                    tab.navigate(&descriptor.launch_url).await?;
                }
                return Ok(Arc::clone(tab));
            }
            tabs.remove(&descriptor.id);
        }

        if let Some(tab) = self.browser.find_tab(&descriptor.origin_pattern).await {
            tabs.insert(descriptor.id.clone(), Arc::clone(&tab));
            return Ok(tab);
        }

        let tab = self.browser.open_tab(&descriptor.launch_url).await?;
        tabs.insert(descriptor.id.clone(), Arc::clone(&tab));
        Ok(tab)
    }

    /// Guarded-exit cleanup: forget the service's tab if it died. Live
    /// tabs stay mapped for reuse by the next session.
    pub async fn drop_if_dead(&self, service_id: &str) {
        let mut tabs = self.tabs.lock().await;
        if let Some(tab) = tabs.get(service_id)
            && !tab.is_alive()
        {
            tabs.remove(service_id);
        }
    }

    pub async fn tab_for(&self, service_id: &str) -> Option<Arc<dyn Tab>> {
        self.tabs.lock().await.get(service_id).cloned()
    }
}
