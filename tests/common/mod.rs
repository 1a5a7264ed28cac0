//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use config_getter::fetch::{FetchError, Fetcher};
use config_getter::model::{DIRECTIVE_ANNOTATION, Resource};
use std::sync::Mutex;
use std::time::Duration;

pub fn make_resource(annotation: &str, value: &str) -> Resource {
    Resource::new("default", "test").annotation(annotation, value)
}

pub fn directive_resource(name: &str, value: &str) -> Resource {
    Resource::new("default", name).annotation(DIRECTIVE_ANNOTATION, value)
}

/// Returns the requested URL as the body and remembers every call.
#[derive(Default)]
pub struct EchoFetcher {
    pub calls: Mutex<Vec<String>>,
}

impl EchoFetcher {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for EchoFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(url.as_bytes().to_vec())
    }
}

/// Always returns the same body.
pub struct StaticFetcher {
    pub body: String,
    pub calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.body.clone().into_bytes())
    }
}

/// Fails every request as if the host did not resolve.
#[derive(Default)]
pub struct FailingFetcher {
    pub calls: Mutex<Vec<String>>,
}

impl FailingFetcher {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Err(FetchError::Other("dns error: no such host".to_string()))
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
