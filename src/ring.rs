//! Bulk transfer ring: a fixed set of USB transfers kept in flight against
//! the device's sample endpoint, resubmitted on completion.
//!
//! Built directly on `libusb1-sys`'s raw `libusb_transfer` API rather than
//! `rusb`'s synchronous helpers, mirroring the original C driver's own use
//! of `libusb_alloc_transfer` / `libusb_fill_bulk_transfer` /
//! `libusb_submit_transfer` / `libusb_cancel_transfer` /
//! `libusb_free_transfer`. The completion callback is a raw `extern
//! "system" fn` that recovers its Rust context from `user_data`, the same
//! idiom the teacher crate uses for its own native stream callback.

use std::os::raw::c_void;
use std::ptr;

use libusb1_sys::{constants, libusb_transfer};

use crate::error::{AirspyError, Result};

/// One in-flight (or about-to-be-submitted) bulk transfer and the buffer
/// it owns. `buffer` must stay allocated and untouched by anyone but the
/// backend for as long as `transfer` is submitted; `Box`-pinning the
/// buffer keeps its address stable across `Vec` moves of the owning ring.
struct TransferSlot {
    transfer: *mut libusb_transfer,
    buffer: Box<[u8]>,
}

// SAFETY: the ring hands these to libusb, which only touches them from the
// event-pump thread that calls `libusb_handle_events_timeout`; application
// threads only call `cancel`/`free`, which are documented libusb-safe from
// any thread.
unsafe impl Send for TransferSlot {}

/// A fixed-size pool of bulk IN transfers. Either fully allocated or fully
/// absent; partial allocation only exists transiently during setup or
/// teardown.
pub struct TransferRing {
    slots: Vec<TransferSlot>,
    buffer_size: usize,
}

impl TransferRing {
    pub fn new() -> Self {
        TransferRing {
            slots: Vec::new(),
            buffer_size: 0,
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Allocates `transfer_count` descriptors, each owning a `buffer_size`
    /// byte buffer. Fails with `Busy` if descriptors already exist.
    pub fn allocate(&mut self, transfer_count: usize, buffer_size: usize) -> Result<()> {
        if self.is_allocated() {
            return Err(AirspyError::Busy);
        }

        let mut slots = Vec::with_capacity(transfer_count);
        for _ in 0..transfer_count {
            // SAFETY: libusb_alloc_transfer(0) allocates a plain (non-iso)
            // transfer; null indicates allocation failure.
            let transfer = unsafe { libusb1_sys::libusb_alloc_transfer(0) };
            if transfer.is_null() {
                return Err(AirspyError::NoMem);
            }
            slots.push(TransferSlot {
                transfer,
                buffer: vec![0u8; buffer_size].into_boxed_slice(),
            });
        }

        self.slots = slots;
        self.buffer_size = buffer_size;
        Ok(())
    }

    /// Fills and submits every descriptor against `endpoint` on
    /// `device_handle`, with `callback` as the completion handler and
    /// `user_data` as its opaque context (typically the owning
    /// `AirspyDevice`). Fails on the first submission error; transfers
    /// submitted before the failure remain submitted (the caller should
    /// treat this as fatal and tear the ring down).
    pub fn prepare(
        &mut self,
        device_handle: *mut libusb1_sys::libusb_device_handle,
        endpoint: u8,
        callback: libusb1_sys::libusb_transfer_cb_fn,
        user_data: *mut c_void,
        timeout_ms: u32,
    ) -> Result<()> {
        for slot in &mut self.slots {
            // SAFETY: `transfer` was just allocated by `allocate` and is
            // not currently submitted; `buffer` outlives the transfer
            // because it is freed only by `free`, after `cancel`.
            unsafe {
                libusb1_sys::libusb_fill_bulk_transfer(
                    slot.transfer,
                    device_handle,
                    endpoint,
                    slot.buffer.as_mut_ptr(),
                    slot.buffer.len() as i32,
                    callback,
                    user_data,
                    timeout_ms,
                );

                let rc = libusb1_sys::libusb_submit_transfer(slot.transfer);
                if rc != 0 {
                    return Err(AirspyError::Transport(format!(
                        "libusb_submit_transfer failed: {rc}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Requests cancellation of every descriptor. Always succeeds if
    /// descriptors exist; cancellation is asynchronous, the actual
    /// completion arrives via the callback with a cancelled status.
    pub fn cancel(&mut self) {
        for slot in &self.slots {
            // SAFETY: `transfer` is a valid, possibly-submitted pointer;
            // libusb_cancel_transfer is safe to call on an unsubmitted or
            // already-completing transfer (it becomes a no-op).
            unsafe {
                libusb1_sys::libusb_cancel_transfer(slot.transfer);
            }
        }
    }

    /// Releases all descriptor and buffer memory. The ring must not be
    /// streaming (transfers must have already completed or been
    /// cancelled) when this is called.
    pub fn free(&mut self) {
        for slot in self.slots.drain(..) {
            // SAFETY: the transfer is no longer submitted by the time
            // `free` is called (the caller cancels and drains completions
            // first); libusb_free_transfer also releases any buffer it
            // owns itself, but ours is owned by `slot.buffer`, not by
            // libusb, since we never set `LIBUSB_TRANSFER_FREE_BUFFER`.
            unsafe {
                libusb1_sys::libusb_free_transfer(slot.transfer);
            }
            drop(slot.buffer);
        }
        self.buffer_size = 0;
    }

    /// Mutable access to a slot's buffer by raw transfer pointer, used by
    /// the completion handler to recover the buffer a completed transfer
    /// belongs to without walking the whole ring.
    pub fn buffer_for(&mut self, transfer: *mut libusb_transfer) -> Option<&mut [u8]> {
        self.slots
            .iter_mut()
            .find(|slot| ptr::eq(slot.transfer, transfer))
            .map(|slot| &mut *slot.buffer)
    }
}

impl Default for TransferRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransferRing {
    fn drop(&mut self) {
        if self.is_allocated() {
            self.cancel();
            self.free();
        }
    }
}

/// True if `status` corresponds to `LIBUSB_TRANSFER_COMPLETED`.
pub fn transfer_completed(status: i32) -> bool {
    status == constants::LIBUSB_TRANSFER_COMPLETED as i32
}
