//! Emulated accelerator: host memory standing in for device allocations.
//!
//! Every allocation receives a synthetic device address so pointer arithmetic, extent checks and
//! location queries behave like they would against real device memory. Capacity is accounted
//! for allocations and scratch reservations alike.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytemuck::Pod;
use parking_lot::{Mutex, RwLock};

use crate::env::runtime_config;
use crate::status::{BlasError, BlasResult};
use crate::types::PointerLocation;

mod stream;

pub use stream::Stream;

const ADDRESS_BASE: u64 = 0x7f00_0000_0000;
const ADDRESS_ALIGN: u64 = 256;

static GLOBAL_DEVICE: OnceLock<Device> = OnceLock::new();

/// Shared handle to one emulated device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    capacity: u64,
    used: Mutex<u64>,
    next_address: AtomicU64,
    live: Mutex<BTreeMap<u64, Weak<BufferCore>>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("capacity", &self.inner.capacity)
            .field("used", &*self.inner.used.lock())
            .finish()
    }
}

impl Device {
    /// Creates an independent device with `capacity` bytes of memory.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                capacity,
                used: Mutex::new(0),
                next_address: AtomicU64::new(ADDRESS_BASE),
                live: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Process-wide device sized by `BLASRS_DEVICE_MEMORY`.
    pub fn global() -> Device {
        GLOBAL_DEVICE
            .get_or_init(|| Device::new(runtime_config().device_memory))
            .clone()
    }

    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    pub fn used_bytes(&self) -> u64 {
        *self.inner.used.lock()
    }

    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn charge(&self, bytes: u64) -> BlasResult<()> {
        let mut used = self.inner.used.lock();
        let available = self.inner.capacity.saturating_sub(*used);
        if bytes > available {
            return Err(BlasError::memory_error(format!(
                "requested {bytes} bytes, {available} of {} available",
                self.inner.capacity
            )));
        }
        *used += bytes;
        Ok(())
    }

    fn release(inner: &DeviceInner, bytes: u64) {
        let mut used = inner.used.lock();
        *used = used.saturating_sub(bytes);
    }

    /// Allocates `bytes` of uninitialized-looking (zero filled) device memory.
    pub fn alloc(&self, bytes: usize) -> BlasResult<DeviceBuffer> {
        self.charge(bytes as u64)?;
        let span = (bytes as u64).max(1).div_ceil(ADDRESS_ALIGN) * ADDRESS_ALIGN;
        // One guard granule between allocations keeps one-past-the-end addresses unambiguous.
        let address = self
            .inner
            .next_address
            .fetch_add(span + ADDRESS_ALIGN, Ordering::Relaxed);
        let core = Arc::new(BufferCore {
            device: Arc::clone(&self.inner),
            address,
            len: bytes,
            words: RwLock::new(vec![0u64; bytes.div_ceil(mem::size_of::<u64>())]),
        });
        self.inner
            .live
            .lock()
            .insert(address, Arc::downgrade(&core));
        log::trace!("device alloc {bytes} bytes at {address:#x}");
        Ok(DeviceBuffer { core })
    }

    pub fn alloc_zeroed(&self, bytes: usize) -> BlasResult<DeviceBuffer> {
        self.alloc(bytes)
    }

    /// Allocates a buffer sized for `values` and copies them in.
    pub fn upload<T: Pod>(&self, values: &[T]) -> BlasResult<DeviceBuffer> {
        let buffer = self.alloc(mem::size_of_val(values))?;
        buffer.ptr().write(values)?;
        Ok(buffer)
    }

    /// Reserves scratch capacity until the returned guard is dropped.
    pub fn reserve(&self, bytes: usize) -> BlasResult<Reservation> {
        self.charge(bytes as u64)?;
        Ok(Reservation {
            device: Arc::clone(&self.inner),
            bytes: bytes as u64,
        })
    }

    /// Reports whether `address` lies inside a live allocation of this device.
    ///
    /// Host residency cannot be confirmed, so anything else is `Unknown`.
    pub fn pointer_location(&self, address: u64) -> PointerLocation {
        // The upgraded core must outlive the guard: dropping it may take the same lock.
        let candidate = {
            let live = self.inner.live.lock();
            live.range(..=address)
                .next_back()
                .and_then(|(_, weak)| weak.upgrade())
        };
        let hit = candidate.is_some_and(|core| address < core.address + core.len as u64);
        if hit {
            PointerLocation::Device
        } else {
            PointerLocation::Unknown
        }
    }
}

/// Scratch capacity held on a device; released on drop.
pub struct Reservation {
    device: Arc<DeviceInner>,
    bytes: u64,
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        Device::release(&self.device, self.bytes);
    }
}

struct BufferCore {
    device: Arc<DeviceInner>,
    address: u64,
    len: usize,
    // u64 words keep every element type up to f64 naturally aligned.
    words: RwLock<Vec<u64>>,
}

impl Drop for BufferCore {
    fn drop(&mut self) {
        self.device.live.lock().remove(&self.address);
        Device::release(&self.device, self.len as u64);
    }
}

/// One device allocation. Clones share the same memory.
#[derive(Clone)]
pub struct DeviceBuffer {
    core: Arc<BufferCore>,
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("address", &self.core.address)
            .field("bytes", &self.core.len)
            .finish()
    }
}

impl DeviceBuffer {
    pub fn bytes(&self) -> usize {
        self.core.len
    }

    pub fn device_address(&self) -> u64 {
        self.core.address
    }

    /// Pointer to the first byte of the allocation.
    pub fn ptr(&self) -> DevicePtr {
        DevicePtr {
            buffer: Some(self.clone()),
            offset: 0,
        }
    }

    pub fn read_to_vec(&self) -> Vec<u8> {
        let words = self.core.words.read();
        bytemuck::cast_slice::<u64, u8>(&words)[..self.core.len].to_vec()
    }

    /// Copies the whole allocation out as elements of `T`; trailing partial elements are dropped.
    pub fn download<T: Pod>(&self) -> Vec<T> {
        let count = self.core.len / mem::size_of::<T>();
        let mut out = vec![T::zeroed(); count];
        let words = self.core.words.read();
        let bytes = bytemuck::cast_slice::<u64, u8>(&words);
        bytemuck::cast_slice_mut::<T, u8>(&mut out)
            .copy_from_slice(&bytes[..count * mem::size_of::<T>()]);
        out
    }

    pub fn fill_bytes(&self, value: u8) {
        let mut words = self.core.words.write();
        bytemuck::cast_slice_mut::<u64, u8>(&mut words).fill(value);
    }

    fn byte_range(&self, offset: i64, len: usize) -> BlasResult<std::ops::Range<usize>> {
        let start = usize::try_from(offset).map_err(|_| {
            BlasError::invalid_size(format!("device access at negative offset {offset}"))
        })?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.core.len)
            .ok_or_else(|| {
                BlasError::invalid_size(format!(
                    "device access [{start}, +{len}) exceeds allocation of {} bytes",
                    self.core.len
                ))
            })?;
        Ok(start..end)
    }
}

/// A device address: an allocation plus a signed byte offset, or null.
///
/// The offset may point outside the allocation; accesses are bounds checked.
#[derive(Clone, Default)]
pub struct DevicePtr {
    buffer: Option<DeviceBuffer>,
    offset: i64,
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("DevicePtr(null)")
        } else {
            write!(f, "DevicePtr({:#x})", self.address())
        }
    }
}

impl DevicePtr {
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.buffer.is_none()
    }

    pub fn buffer(&self) -> Option<&DeviceBuffer> {
        self.buffer.as_ref()
    }

    /// Byte offset from the start of the allocation.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Synthetic device address; `0` for null.
    pub fn address(&self) -> u64 {
        match &self.buffer {
            Some(buffer) => buffer.core.address.wrapping_add_signed(self.offset),
            None => 0,
        }
    }

    /// Pointer moved by `bytes`. Moving null stays null.
    pub fn byte_offset(&self, bytes: i64) -> DevicePtr {
        DevicePtr {
            buffer: self.buffer.clone(),
            offset: self.offset.saturating_add(bytes),
        }
    }

    /// Pointer moved by `count` elements of `T`.
    pub fn add<T>(&self, count: i64) -> DevicePtr {
        self.byte_offset(count.saturating_mul(mem::size_of::<T>() as i64))
    }

    /// Checks that `[offset + first_byte, offset + end_byte)` lies inside the allocation.
    pub fn check_span(&self, first_byte: i64, end_byte: i64) -> BlasResult<()> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| BlasError::invalid_pointer("null device pointer"))?;
        let start = self.offset.checked_add(first_byte);
        let end = self.offset.checked_add(end_byte);
        match (start, end) {
            (Some(start), Some(end))
                if start >= 0 && end >= start && end <= buffer.core.len as i64 =>
            {
                Ok(())
            }
            _ => Err(BlasError::invalid_size(format!(
                "operand extent exceeds allocation of {} bytes",
                buffer.core.len
            ))),
        }
    }

    /// Reads `count` elements of `T` starting `elem_offset` elements past this pointer.
    pub fn read<T: Pod>(&self, elem_offset: i64, count: usize) -> BlasResult<Vec<T>> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| BlasError::invalid_pointer("read through null device pointer"))?;
        let size = mem::size_of::<T>();
        let range = buffer.byte_range(self.element_byte(elem_offset, size)?, count * size)?;
        let mut out = vec![T::zeroed(); count];
        let words = buffer.core.words.read();
        bytemuck::cast_slice_mut::<T, u8>(&mut out)
            .copy_from_slice(&bytemuck::cast_slice::<u64, u8>(&words)[range]);
        Ok(out)
    }

    /// Writes `values` at this pointer.
    pub fn write<T: Pod>(&self, values: &[T]) -> BlasResult<()> {
        self.write_at(0, values)
    }

    /// Writes `values` starting `elem_offset` elements past this pointer.
    pub fn write_at<T: Pod>(&self, elem_offset: i64, values: &[T]) -> BlasResult<()> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| BlasError::invalid_pointer("write through null device pointer"))?;
        let range = buffer.byte_range(
            self.element_byte(elem_offset, mem::size_of::<T>())?,
            mem::size_of_val(values),
        )?;
        let mut words = buffer.core.words.write();
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[range]
            .copy_from_slice(bytemuck::cast_slice(values));
        Ok(())
    }

    fn element_byte(&self, elem_offset: i64, size: usize) -> BlasResult<i64> {
        elem_offset
            .checked_mul(size as i64)
            .and_then(|bytes| bytes.checked_add(self.offset))
            .ok_or_else(|| BlasError::invalid_size("device offset overflows"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[test]
    fn allocations_are_charged_and_released() {
        let device = Device::new(1024);
        let buffer = device.alloc(600).unwrap();
        assert_eq!(device.used_bytes(), 600);
        let err = device.alloc(600).unwrap_err();
        assert_eq!(err.status(), Status::MemoryError);
        drop(buffer);
        assert_eq!(device.used_bytes(), 0);
        let reservation = device.reserve(1000).unwrap();
        assert_eq!(device.used_bytes(), 1000);
        drop(reservation);
        assert_eq!(device.used_bytes(), 0);
    }

    #[test]
    fn pointer_location_confirms_only_live_device_memory() {
        let device = Device::new(1 << 20);
        let buffer = device.alloc(64).unwrap();
        let base = buffer.device_address();
        assert_eq!(device.pointer_location(base), PointerLocation::Device);
        assert_eq!(device.pointer_location(base + 63), PointerLocation::Device);
        assert_eq!(device.pointer_location(base + 64), PointerLocation::Unknown);
        let host = [0u8; 4];
        assert_eq!(
            device.pointer_location(host.as_ptr() as u64),
            PointerLocation::Unknown
        );
        drop(buffer);
        assert_eq!(device.pointer_location(base), PointerLocation::Unknown);
    }

    #[test]
    fn typed_reads_respect_offsets_and_bounds() {
        let device = Device::new(1 << 20);
        let buffer = device.upload(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let ptr = buffer.ptr().add::<f32>(1);
        assert_eq!(ptr.read::<f32>(0, 2).unwrap(), vec![2.0, 3.0]);
        assert_eq!(ptr.read::<f32>(-1, 1).unwrap(), vec![1.0]);
        assert_eq!(
            ptr.read::<f32>(2, 2).unwrap_err().status(),
            Status::InvalidSize
        );
        ptr.write_at(2, &[9.0f32]).unwrap();
        assert_eq!(buffer.download::<f32>(), vec![1.0, 2.0, 3.0, 9.0]);
        assert!(ptr.check_span(-4, 12).is_ok());
        assert!(ptr.check_span(-8, 4).is_err());
        assert_eq!(
            DevicePtr::null().read::<f32>(0, 1).unwrap_err().status(),
            Status::InvalidPointer
        );
    }
}
