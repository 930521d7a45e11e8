//! Search-as-you-type over listings, with the recent-search history kept on device.

use crate::api::client::ApiClient;
use crate::api::models::Property;
use crate::error::Result;
use crate::storage::DeviceStore;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Runs a handler only for the last query of a burst, once input has been quiet for `delay`.
pub struct Debouncer {
    tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Debouncer {
    pub fn spawn<F, Fut>(delay: Duration, mut on_settled: F) -> Self
    where
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn(async move {
            let mut pending: Option<String> = None;
            loop {
                match pending.take() {
                    None => match rx.recv().await {
                        Some(q) => pending = Some(q),
                        None => break,
                    },
                    Some(q) => match tokio::time::timeout(delay, rx.recv()).await {
                        Ok(Some(newer)) => pending = Some(newer),
                        Ok(None) => break,
                        Err(_) => on_settled(q).await,
                    },
                }
            }
        });
        Self { tx, task }
    }

    pub fn submit(&self, query: impl Into<String>) {
        if self.tx.send(query.into()).is_err() {
            log::debug!("Debouncer already shut down");
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Records the query in the recent-search list, then fetches matching listings.
pub async fn search_listings(api: &ApiClient, store: &DeviceStore, query: &str) -> Result<Vec<Property>> {
    let query = query.trim();
    if !query.is_empty() {
        if let Err(e) = store.push_recent_search(query) {
            log::warn!("Could not save recent search: {}", e);
        }
    }
    api.list_properties(Some(query)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Debouncer) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let d = Debouncer::spawn(Duration::from_millis(400), move |q| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(q) }
        });
        (seen, d)
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_query_of_burst_runs() {
        let (seen, d) = recorder();
        d.submit("l");
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.submit("le");
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.submit("lek");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["lek".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_each_run() {
        let (seen, d) = recorder();
        d.submit("ikoyi");
        tokio::time::sleep(Duration::from_millis(500)).await;
        d.submit("lekki");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["ikoyi".to_string(), "lekki".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_debouncer_never_fires() {
        let (seen, d) = recorder();
        d.submit("yaba");
        drop(d);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
