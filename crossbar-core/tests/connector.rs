//! Cross-module behavior of the connector against an instrumented mock bus:
//! gap-terminated enumeration, capacity rejection without hardware side
//! effects, ordered teardown, event coalescing, and the end-to-end
//! emit/dispatch/wait path.

use std::cell::UnsafeCell;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbar_core::{
    BusDevice, ClientError, Connector, ConnectorConfig, LineId, LineStatus, ProbeError,
    RegionDescriptor, RegionMap,
};
use crossbar_io::{MemoryAttribute, PAGE_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    Enable,
    Disable,
    Reserve,
    Release,
    Map(u32),
    Unmap(u32),
}

/// Region backing store with the lifetime of the mock device, like a real
/// bus window outliving any individual mapping of it.
struct SharedBuf(UnsafeCell<Box<[u8]>>);

// SAFETY: test-only backing; access is raw-pointer based and the tests
// serialize anything that matters.
unsafe impl Send for SharedBuf {}
unsafe impl Sync for SharedBuf {}

impl SharedBuf {
    fn new(len: usize) -> Self {
        Self(UnsafeCell::new(vec![0u8; len].into_boxed_slice()))
    }

    fn ptr(&self) -> *mut u8 {
        // SAFETY: the box is never reallocated after construction.
        unsafe { (&mut *self.0.get()).as_mut_ptr() }
    }

    fn len(&self) -> usize {
        // SAFETY: as above.
        unsafe { (&*self.0.get()).len() }
    }

    fn byte(&self, offset: usize) -> u8 {
        assert!(offset < self.len());
        // SAFETY: bounds asserted.
        unsafe { *self.ptr().add(offset) }
    }

    fn put(&self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.len());
        // SAFETY: bounds asserted.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr().add(offset), bytes.len());
        }
    }
}

struct MockMap {
    index: u32,
    ptr: *mut u8,
    len: usize,
    calls: Arc<Mutex<Vec<Call>>>,
}

// SAFETY: the pointer targets the mock device's backing, which outlives the
// map via the Arc the connector holds.
unsafe impl Send for MockMap {}
unsafe impl Sync for MockMap {}

impl RegionMap for MockMap {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MockMap {
    fn drop(&mut self) {
        self.calls.lock().unwrap().push(Call::Unmap(self.index));
    }
}

struct MockDevice {
    label: String,
    line: LineId,
    backings: Vec<SharedBuf>,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_enable: bool,
    fail_reserve: bool,
    fail_map_at: Option<u32>,
}

impl MockDevice {
    fn new(label: &str, regions: usize) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            line: 0,
            backings: (0..regions).map(|_| SharedBuf::new(PAGE_SIZE)).collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_enable: false,
            fail_reserve: false,
            fail_map_at: None,
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl BusDevice for MockDevice {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn line(&self) -> LineId {
        self.line
    }

    fn enable(&self) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(Call::Enable);
        if self.fail_enable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "enable refused",
            ));
        }
        Ok(())
    }

    fn disable(&self) {
        self.calls.lock().unwrap().push(Call::Disable);
    }

    fn reserve_regions(&self) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(Call::Reserve);
        if self.fail_reserve {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "resource set busy",
            ));
        }
        Ok(())
    }

    fn release_regions(&self) {
        self.calls.lock().unwrap().push(Call::Release);
    }

    fn region_descriptor(&self, index: u32) -> Option<RegionDescriptor> {
        let backing = self.backings.get(index as usize)?;
        Some(RegionDescriptor {
            index,
            base: 0x1000_0000 + u64::from(index) * PAGE_SIZE as u64,
            size: backing.len(),
        })
    }

    fn map_region(
        &self,
        desc: &RegionDescriptor,
        _attr: MemoryAttribute,
    ) -> std::io::Result<Box<dyn RegionMap>> {
        if self.fail_map_at == Some(desc.index) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "window exhausted",
            ));
        }
        self.calls.lock().unwrap().push(Call::Map(desc.index));
        let backing = &self.backings[desc.index as usize];
        Ok(Box::new(MockMap {
            index: desc.index,
            ptr: backing.ptr(),
            len: backing.len(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

fn connector() -> Connector {
    Connector::new(ConnectorConfig::default())
}

#[test]
fn test_contiguous_regions_register_fully() {
    let connector = connector();
    for k in 0..5usize {
        let dev = MockDevice::new(&format!("mock.d{}", k), k + 1);
        let id = connector.probe(dev.clone()).unwrap();
        let handle = connector.open(id).unwrap();
        assert_eq!(handle.region_count(), k + 1);
    }
    assert_eq!(connector.device_count(), 5);
}

#[test]
fn test_zero_region_device_fails_probe() {
    let connector = connector();
    let dev = MockDevice::new("mock.empty", 0);
    match connector.probe(dev.clone()) {
        Err(ProbeError::MappingFailed { index: 0, .. }) => {}
        other => panic!("expected MappingFailed(0), got {:?}", other),
    }
    // The device was enabled and its resources reserved before the walk, so
    // both must have been handed back.
    assert_eq!(
        dev.calls(),
        vec![Call::Enable, Call::Reserve, Call::Release, Call::Disable]
    );
    assert_eq!(connector.device_count(), 0);
}

#[test]
fn test_enable_failure_is_resource_unavailable() {
    let connector = connector();
    let mut dev = MockDevice::new("mock.dead", 2);
    Arc::get_mut(&mut dev).unwrap().fail_enable = true;
    assert!(matches!(
        connector.probe(dev.clone()),
        Err(ProbeError::ResourceUnavailable(_))
    ));
    assert_eq!(dev.calls(), vec![Call::Enable]);
    assert_eq!(connector.device_count(), 0);
}

#[test]
fn test_reserve_failure_disables_device() {
    let connector = connector();
    let mut dev = MockDevice::new("mock.busy", 2);
    Arc::get_mut(&mut dev).unwrap().fail_reserve = true;
    assert!(matches!(
        connector.probe(dev.clone()),
        Err(ProbeError::ResourceUnavailable(_))
    ));
    assert_eq!(dev.calls(), vec![Call::Enable, Call::Reserve, Call::Disable]);
}

#[test]
fn test_registry_full_touches_no_hardware() {
    let connector = Connector::new(ConnectorConfig {
        capacity: 1,
        ..ConnectorConfig::default()
    });
    let first = MockDevice::new("mock.d0", 1);
    connector.probe(first).unwrap();

    let rejected = MockDevice::new("mock.d1", 1);
    assert!(matches!(
        connector.probe(rejected.clone()),
        Err(ProbeError::RegistryFull)
    ));
    assert!(rejected.calls().is_empty());
}

#[test]
fn test_slot_reclaimed_after_remove() {
    let connector = Connector::new(ConnectorConfig {
        capacity: 1,
        ..ConnectorConfig::default()
    });
    let first = MockDevice::new("mock.d0", 1);
    let id = connector.probe(first).unwrap();
    connector.remove(id).unwrap();

    let second = MockDevice::new("mock.d1", 1);
    assert!(connector.probe(second).is_ok());
}

#[test]
fn test_map_failure_unwinds_in_reverse() {
    let connector = connector();
    let mut dev = MockDevice::new("mock.partial", 4);
    Arc::get_mut(&mut dev).unwrap().fail_map_at = Some(2);

    match connector.probe(dev.clone()) {
        Err(ProbeError::MappingFailed { index: 2, .. }) => {}
        other => panic!("expected MappingFailed(2), got {:?}", other),
    }
    assert_eq!(
        dev.calls(),
        vec![
            Call::Enable,
            Call::Reserve,
            Call::Map(0),
            Call::Map(1),
            Call::Unmap(1),
            Call::Unmap(0),
            Call::Release,
            Call::Disable,
        ]
    );
    assert_eq!(connector.device_count(), 0);
}

#[test]
fn test_remove_releases_in_reverse_and_disengages_first() {
    let connector = connector();
    let dev = MockDevice::new("mock.d0", 3);
    let id = connector.probe(dev.clone()).unwrap();

    // Ring the doorbell, then drop the handle so no view pins region 0.
    let handle = connector.open(id).unwrap();
    handle.emit();
    drop(handle);

    dev.clear_calls();
    connector.remove(id).unwrap();
    assert_eq!(
        dev.calls(),
        vec![
            Call::Unmap(2),
            Call::Unmap(1),
            Call::Unmap(0),
            Call::Release,
            Call::Disable,
        ]
    );

    // The line entry went away before any unmap: the still-set doorbell word
    // was never claimed, and dispatch no longer owns it.
    assert_eq!(dev.backings[0].byte(0), 1);
    assert_eq!(connector.dispatch_line(0), LineStatus::NotMine);
    assert!(connector.open(id).is_err());
}

#[test]
fn test_remove_unblocks_waiter_with_channel_down() {
    let connector = Arc::new(connector());
    let dev = MockDevice::new("mock.d0", 1);
    let id = connector.probe(dev).unwrap();
    let handle = connector.open(id).unwrap();

    let waiter = thread::spawn(move || handle.wait());
    thread::sleep(Duration::from_millis(50));
    connector.remove(id).unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(ClientError::ChannelDown)));
}

#[test]
fn test_two_emits_one_wakeup() {
    let connector = connector();
    let dev = MockDevice::new("mock.d0", 1);
    let id = connector.probe(dev).unwrap();
    let handle = connector.open(id).unwrap();

    handle.emit();
    handle.emit();
    // Both emits collapse into one pending doorbell and one delivery.
    assert_eq!(connector.dispatch_line(0), LineStatus::Handled(1));
    assert_eq!(connector.dispatch_line(0), LineStatus::NotMine);
    assert!(handle.wait().unwrap() >= 1);

    let second = connector.open(id).unwrap();
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let _ = tx.send(second.wait());
    });
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    connector.remove(id).unwrap();
    waiter.join().unwrap();
}

#[test]
fn test_emit_before_wait_is_not_missed() {
    let connector = connector();
    let dev = MockDevice::new("mock.d0", 1);
    let id = connector.probe(dev).unwrap();
    let handle = connector.open(id).unwrap();

    handle.emit();
    assert_eq!(connector.dispatch_line(0), LineStatus::Handled(1));
    // The delivery happened strictly before this wait began.
    assert!(handle.wait().unwrap() >= 1);
}

#[test]
fn test_end_to_end_hello_through_dataport() {
    let connector = Arc::new(connector());
    let dev = MockDevice::new("mock.d0", 2);
    let id = connector.probe(dev).unwrap();

    let writer = connector.open(id).unwrap();
    let waiter = connector.open(id).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiting = thread::spawn(move || {
        let token = waiter.wait();
        let _ = tx.send(token);
        waiter
    });

    let dataport = writer.map_region(PAGE_SIZE).unwrap();
    dataport.write(0, b"hello").unwrap();
    writer.emit();

    // The host's dispatch facility observes the interrupt.
    loop {
        if connector.dispatch_line(0) == LineStatus::Handled(1) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let token = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert!(token >= 1);

    let waiter = waiting.join().unwrap();
    let view = waiter.map_region(PAGE_SIZE).unwrap();
    let mut readback = [0u8; 5];
    view.read(0, &mut readback).unwrap();
    assert_eq!(&readback, b"hello");
}

#[test]
fn test_unadvertised_region_is_protocol_violation() {
    let connector = connector();
    let dev = MockDevice::new("mock.d0", 2);
    let id = connector.probe(dev).unwrap();
    let handle = connector.open(id).unwrap();

    assert!(matches!(
        handle.map_region(3 * PAGE_SIZE),
        Err(ClientError::ProtocolViolation { index: 3 })
    ));
    assert!(matches!(
        handle.map_region(PAGE_SIZE + 1),
        Err(ClientError::Io(_))
    ));
    // An offset whose index exceeds 32 bits must not wrap into a low index
    // that happens to exist; region 0 here is real but was never asked for.
    let far = (u32::MAX as usize + 1) * PAGE_SIZE;
    assert!(matches!(handle.map_region(far), Err(ClientError::Io(_))));
    assert!(handle.map_region(0).is_ok());
}

#[test]
fn test_view_access_is_bounds_checked() {
    let connector = connector();
    let dev = MockDevice::new("mock.d0", 2);
    let id = connector.probe(dev).unwrap();
    let handle = connector.open(id).unwrap();
    let view = handle.map_region(PAGE_SIZE).unwrap();

    assert!(view.write(PAGE_SIZE - 1, &[0, 0]).is_err());
    assert!(view.write(usize::MAX, &[1]).is_err());
    let mut buf = [0u8; 2];
    assert!(view.read(PAGE_SIZE, &mut buf).is_err());
    assert!(view.write(PAGE_SIZE - 2, &buf).is_ok());
}

#[test]
fn test_advertised_name_replaces_default() {
    let cfg = ConnectorConfig::default();
    let connector = Connector::new(cfg.clone());

    let named = MockDevice::new("mock.named", 1);
    named.backings[0].put(cfg.name_offset, b"reverse_string\0");
    let id = connector.probe(named).unwrap();
    assert_eq!(connector.open(id).unwrap().name(), "reverse_string");

    let anonymous = MockDevice::new("mock.anon", 1);
    let id = connector.probe(anonymous).unwrap();
    let handle = connector.open(id).unwrap();
    assert_eq!(handle.name(), format!("connector-{}", handle.id()));
}
