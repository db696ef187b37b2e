//! In-process backend with call accounting and fault injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::{check_range, check_records, Backend, BackendError, ContainerHandle, ShareScope};

#[derive(Debug, Clone)]
struct StoredContainer {
    name:    String,
    shared:  Option<ShareScope>,
    records: Vec<String>,
}

impl StoredContainer {
    fn populated(&self) -> usize {
        self.records.iter().rposition(|r| !r.is_empty()).map_or(0, |i| i + 1)
    }
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, StoredContainer>,
    deleted:    Vec<String>,
    /// Remaining successful write calls before every write fails.
    write_budget: Option<usize>,
}

pub struct MemoryBackend {
    max_records:      usize,
    max_record_chars: usize,
    state:            Mutex<State>,
    creates:          AtomicUsize,
    shares:           AtomicUsize,
    deletes:          AtomicUsize,
    opens:            AtomicUsize,
    write_calls:      AtomicUsize,
    records_written:  AtomicUsize,
    read_calls:       AtomicUsize,
}

impl MemoryBackend {
    /// A store whose containers hold `max_records` records of at most
    /// `max_record_chars` characters each (reserved marker included).
    pub fn new(max_records: usize, max_record_chars: usize) -> Self {
        Self {
            max_records,
            max_record_chars,
            state:           Mutex::new(State::default()),
            creates:         AtomicUsize::new(0),
            shares:          AtomicUsize::new(0),
            deletes:         AtomicUsize::new(0),
            opens:           AtomicUsize::new(0),
            write_calls:     AtomicUsize::new(0),
            records_written: AtomicUsize::new(0),
            read_calls:      AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let `calls` more write calls succeed, then reject every write.
    pub fn fail_writes_after(&self, calls: usize) {
        self.state().write_budget = Some(calls);
    }

    pub fn disarm(&self) {
        self.state().write_budget = None;
    }

    pub fn containers_created(&self) -> usize { self.creates.load(Ordering::SeqCst) }
    pub fn share_calls(&self)        -> usize { self.shares.load(Ordering::SeqCst) }
    pub fn delete_calls(&self)       -> usize { self.deletes.load(Ordering::SeqCst) }
    pub fn open_calls(&self)         -> usize { self.opens.load(Ordering::SeqCst) }
    pub fn write_calls(&self)        -> usize { self.write_calls.load(Ordering::SeqCst) }
    pub fn records_written(&self)    -> usize { self.records_written.load(Ordering::SeqCst) }
    pub fn read_calls(&self)         -> usize { self.read_calls.load(Ordering::SeqCst) }

    /// Capability calls of every kind observed so far.  Writes count once
    /// accepted; every other call counts even when it fails.
    pub fn total_calls(&self) -> usize {
        self.containers_created()
            + self.share_calls()
            + self.delete_calls()
            + self.open_calls()
            + self.write_calls()
            + self.read_calls()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().containers.contains_key(id)
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn shared_scope(&self, id: &str) -> Option<ShareScope> {
        self.state().containers.get(id).and_then(|c| c.shared)
    }

    /// Raw stored records of a container, trailing unwritten records dropped.
    pub fn records(&self, id: &str) -> Option<Vec<String>> {
        self.state().containers.get(id).map(|c| c.records[..c.populated()].to_vec())
    }

    /// Overwrite a record directly, bypassing accounting and fault injection.
    pub fn poke(&self, id: &str, index: usize, value: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_owned()))?;
        check_range(index, index, self.max_records)?;
        container.records[index - 1] = value.to_owned();
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn create_container(&self, name: &str) -> Result<ContainerHandle, BackendError> {
        let id = Uuid::new_v4().simple().to_string();
        self.state().containers.insert(id.clone(), StoredContainer {
            name:    name.to_owned(),
            shared:  None,
            records: vec![String::new(); self.max_records],
        });
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerHandle { id, name: name.to_owned(), records: 0 })
    }

    fn share_container(&self, handle: &ContainerHandle, scope: ShareScope) -> Result<(), BackendError> {
        self.shares.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(&handle.id)
            .ok_or_else(|| BackendError::NotFound(handle.id.clone()))?;
        container.shared = Some(scope);
        Ok(())
    }

    fn delete_container(&self, id: &str) -> Result<(), BackendError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state
            .containers
            .remove(id)
            .ok_or_else(|| BackendError::NotFound(id.to_owned()))?;
        state.deleted.push(id.to_owned());
        Ok(())
    }

    fn open_container(&self, id: &str) -> Result<ContainerHandle, BackendError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| BackendError::NotFound(id.to_owned()))?;
        Ok(ContainerHandle {
            id:      id.to_owned(),
            name:    container.name.clone(),
            records: container.populated(),
        })
    }

    fn read_record_range(&self, handle: &ContainerHandle, start: usize, end: usize)
        -> Result<Vec<String>, BackendError>
    {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        check_range(start, end, self.max_records)?;
        let state = self.state();
        let container = state
            .containers
            .get(&handle.id)
            .ok_or_else(|| BackendError::NotFound(handle.id.clone()))?;
        Ok(container.records[start - 1..end].to_vec())
    }

    fn write_record_batch(&self, handle: &ContainerHandle, start: usize, records: &[String])
        -> Result<(), BackendError>
    {
        if records.is_empty() {
            return Ok(());
        }
        let end = start + records.len() - 1;
        check_range(start, end, self.max_records)?;
        check_records(start, records, self.max_record_chars)?;

        let mut state = self.state();
        if let Some(budget) = state.write_budget.as_mut() {
            if *budget == 0 {
                return Err(BackendError::Rejected("injected write failure".into()));
            }
            *budget -= 1;
        }
        let container = state
            .containers
            .get_mut(&handle.id)
            .ok_or_else(|| BackendError::NotFound(handle.id.clone()))?;
        container.records[start - 1..=end - 1].clone_from_slice(records);
        drop(state);

        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.records_written.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let backend = MemoryBackend::new(10, 8);
        let handle = backend.create_container("blob 1").unwrap();
        backend.write_record_batch(&handle, 3, &["'abc".into(), "'de".into()]).unwrap();

        let opened = backend.open_container(&handle.id).unwrap();
        assert_eq!(opened.records, 4);
        let got = backend.read_record_range(&opened, 1, 4).unwrap();
        assert_eq!(got, vec!["", "", "'abc", "'de"]);
        assert_eq!(backend.records_written(), 2);
    }

    #[test]
    fn enforces_limits() {
        let backend = MemoryBackend::new(4, 3);
        let handle = backend.create_container("x").unwrap();
        assert!(matches!(
            backend.write_record_batch(&handle, 4, &["a".into(), "b".into()]),
            Err(BackendError::OutOfRange { start: 4, end: 5, limit: 4 })
        ));
        assert!(matches!(
            backend.write_record_batch(&handle, 1, &["abcd".into()]),
            Err(BackendError::RecordTooLong { index: 1, len: 4, limit: 3 })
        ));
        assert!(matches!(
            backend.read_record_range(&handle, 0, 2),
            Err(BackendError::OutOfRange { .. })
        ));
    }

    #[test]
    fn injected_failures_after_budget() {
        let backend = MemoryBackend::new(4, 3);
        let handle = backend.create_container("x").unwrap();
        backend.fail_writes_after(1);
        backend.write_record_batch(&handle, 1, &["a".into()]).unwrap();
        assert!(matches!(
            backend.write_record_batch(&handle, 2, &["b".into()]),
            Err(BackendError::Rejected(_))
        ));
        backend.disarm();
        backend.write_record_batch(&handle, 2, &["b".into()]).unwrap();
        assert_eq!(backend.write_calls(), 2);
    }

    #[test]
    fn delete_is_recorded() {
        let backend = MemoryBackend::new(4, 3);
        let handle = backend.create_container("x").unwrap();
        backend.share_container(&handle, ShareScope::AnyoneReader).unwrap();
        assert_eq!(backend.shared_scope(&handle.id), Some(ShareScope::AnyoneReader));
        backend.delete_container(&handle.id).unwrap();
        assert!(!backend.contains(&handle.id));
        assert_eq!(backend.deleted(), vec![handle.id.clone()]);
        assert!(matches!(backend.open_container(&handle.id), Err(BackendError::NotFound(_))));
    }

    #[test]
    fn every_capability_call_is_counted() {
        let backend = MemoryBackend::new(4, 3);
        let handle = backend.create_container("x").unwrap();
        backend.share_container(&handle, ShareScope::AnyoneReader).unwrap();
        let opened = backend.open_container(&handle.id).unwrap();
        backend.write_record_batch(&opened, 1, &["'a".into()]).unwrap();
        backend.read_record_range(&opened, 1, 1).unwrap();
        assert!(backend.open_container("missing").is_err());
        backend.delete_container(&handle.id).unwrap();

        assert_eq!(backend.share_calls(), 1);
        assert_eq!(backend.open_calls(), 2);
        assert_eq!(backend.delete_calls(), 1);
        assert_eq!(backend.total_calls(), 7);
    }
}
