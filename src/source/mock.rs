// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{DataSource, NodeId};

/// Shared view into a [`MockSource`], kept by tests after the source is handed off.
#[derive(Debug, Default)]
pub(crate) struct MockHandle {
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    failing_opens: AtomicUsize,
    failing_reads: AtomicUsize,
    failing_closes: AtomicBool,
    panicking_reads: AtomicBool,
}

/// Decrement `counter` if it's above zero, returning whether it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MockHandle {
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make the next `count` opens fail.
    pub(crate) fn fail_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail.
    pub(crate) fn fail_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_closes(&self, fail: bool) {
        self.failing_closes.store(fail, Ordering::SeqCst);
    }

    /// Make reads panic, as if something deep in the transport went badly wrong.
    pub(crate) fn panic_reads(&self, panic: bool) {
        self.panicking_reads.store(panic, Ordering::SeqCst);
    }
}

/// A scripted [`DataSource`] that counts how it's used.
#[derive(Debug)]
pub(crate) struct MockSource {
    handle: Arc<MockHandle>,
    values: Vec<f64>,
    namespaces: Vec<String>,
    read_delay: Option<Duration>,
    open: bool,
}

impl MockSource {
    pub(crate) fn new(values: Vec<f64>) -> Self {
        Self {
            handle: Arc::new(MockHandle::default()),
            values,
            namespaces: vec![
                "http://opcfoundation.org/UA/".to_string(),
                "urn:mock:server".to_string(),
                "BeagleBoneThermal".to_string(),
            ],
            read_delay: None,
            open: false,
        }
    }

    pub(crate) fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Make every read take `delay` before responding.
    pub(crate) fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub(crate) fn handle(&self) -> Arc<MockHandle> {
        Arc::clone(&self.handle)
    }
}

#[async_trait]
impl DataSource for MockSource {
    async fn open(&mut self) -> anyhow::Result<()> {
        self.handle.opens.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.handle.failing_opens) {
            self.open = false;
            return Err(anyhow!("connection refused"));
        }
        self.open = true;
        Ok(())
    }

    async fn namespace_array(&mut self) -> anyhow::Result<Vec<String>> {
        if !self.open {
            return Err(anyhow!("not open"));
        }
        Ok(self.namespaces.clone())
    }

    async fn resolve(&mut self, namespace: u16, name: &str) -> anyhow::Result<NodeId> {
        if !self.open {
            return Err(anyhow!("not open"));
        }
        Ok(NodeId {
            namespace,
            name: name.to_string(),
        })
    }

    async fn read_values(&mut self, _node: &NodeId) -> anyhow::Result<Vec<f64>> {
        self.handle.reads.fetch_add(1, Ordering::SeqCst);
        if self.handle.panicking_reads.load(Ordering::SeqCst) {
            panic!("mock read panicked");
        }
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.open {
            return Err(anyhow!("not open"));
        }
        if take_one(&self.handle.failing_reads) {
            self.open = false;
            return Err(anyhow!("connection reset"));
        }
        Ok(self.values.clone())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
        if self.handle.failing_closes.load(Ordering::SeqCst) {
            return Err(anyhow!("already closed"));
        }
        Ok(())
    }
}
