//! Pluggable fetch providers (spec §4.9). A provider is instantiated fresh
//! per event — it must be stateless across fetches so the registry can
//! hand out one per job without coordination.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opal_core::FetchEvent;
use serde_json::Value;

use crate::error::{FetchError, Result};

#[async_trait]
pub trait FetchProvider: Send + Sync {
    async fn fetch(&self) -> Result<Value>;
}

pub struct HttpGetProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpGetProvider {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl FetchProvider for HttpGetProvider {
    async fn fetch(&self) -> Result<Value> {
        let response = self.client.get(&self.url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

pub type ProviderFactory = Arc<dyn Fn(&FetchEvent) -> Arc<dyn FetchProvider> + Send + Sync>;

/// `name -> factory(event) -> Provider`. The default HTTP GET provider is
/// registered under `"http_get"`.
#[derive(Clone)]
pub struct ProviderRegistry {
    client: reqwest::Client,
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let client = reqwest::Client::new();
        let mut factories: HashMap<String, ProviderFactory> = HashMap::new();
        let http_client = client.clone();
        factories.insert(
            "http_get".to_string(),
            Arc::new(move |event: &FetchEvent| {
                let provider = HttpGetProvider::new(http_client.clone(), event.url.clone());
                Arc::new(provider) as Arc<dyn FetchProvider>
            }),
        );
        Self { client, factories }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn build(&self, event: &FetchEvent) -> Result<Arc<dyn FetchProvider>> {
        let factory = self
            .factories
            .get(&event.fetcher_name)
            .ok_or_else(|| FetchError::UnknownProvider(event.fetcher_name.clone()))?;
        Ok(factory(event))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_http_get() {
        let registry = ProviderRegistry::new();
        let event = FetchEvent::new("http_get", "http://example.com", Value::Null);
        assert!(registry.build(&event).is_ok());
    }

    #[test]
    fn unknown_provider_errors() {
        let registry = ProviderRegistry::new();
        let event = FetchEvent::new("nonexistent", "http://example.com", Value::Null);
        assert!(matches!(
            registry.build(&event),
            Err(FetchError::UnknownProvider(_))
        ));
    }
}
