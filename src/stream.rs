//! Streaming controller: drives the event pump, converts and delivers
//! processed blocks to the user callback, coordinates start/stop.

use std::os::raw::c_void;
use std::sync::atomic::Ordering;
use std::time::Duration;

use libusb1_sys::libusb_transfer;
use rusb::UsbContext;

use crate::codec;
use crate::device::{AirspyDevice, ReceiverMode};
use crate::error::{AirspyError, Result};

/// A processed block handed to the user callback. `samples` points at
/// interleaved signed 16-bit I/Q; `sample_count` is the number of complex
/// pairs (`buffer_size / 4`, i.e. 2 bytes per component, I and Q).
pub struct SampleBlock<'a> {
    pub samples: &'a [i16],
    pub sample_count: usize,
}

/// User callback signature: a non-zero return requests that streaming
/// stop after this block.
pub type RxCallback = fn(&SampleBlock, ctx: *mut c_void) -> i32;

/// Prepares the device for streaming: mode OFF, clear halt, reset
/// converter, mode RX, submit the ring against the sample endpoint with
/// the completion handler below.
pub fn init_rx(device: &mut AirspyDevice) -> Result<()> {
    device.set_receiver_mode(ReceiverMode::Off)?;
    device.set_receiver_mode(ReceiverMode::Rx)?;

    device.stop_requested.store(false, Ordering::Relaxed);
    device.streaming.store(true, Ordering::Relaxed);

    let handle = device.raw_handle();
    // The device itself is passed as `user_data`, the same way
    // `airspy_init_rx` hands `device` straight to `libusb_fill_bulk_transfer`
    // rather than a separate context wrapper; `device` outlives the ring
    // (the caller holds `&mut AirspyDevice` for init_rx/do_rx/term_rx).
    let user_data = device as *mut AirspyDevice as *mut c_void;

    let result = device.ring.prepare(
        handle,
        crate::usb::SAMPLE_ENDPOINT,
        Some(transfer_callback),
        user_data,
        0,
    );

    if result.is_err() {
        device.streaming.store(false, Ordering::Relaxed);
    }

    result
}

/// Pumps the USB event loop with a 500 ms timeout while streaming and not
/// stop-requested, delivering processed blocks to `callback`.
pub fn do_rx(device: &mut AirspyDevice, callback: RxCallback, ctx: *mut c_void) -> Result<()> {
    device.callback = Some(callback);
    device.callback_ctx = ctx;

    // Poll the same context the handle was opened against (`device.context`);
    // a freshly created context never sees completions submitted on a
    // different one.
    while device.streaming.load(Ordering::Relaxed) && !device.stop_requested.load(Ordering::Relaxed)
    {
        match device.context.handle_events(Some(Duration::from_millis(500))) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => continue,
            Err(_) => {
                device.streaming.store(false, Ordering::Relaxed);
                return Err(AirspyError::StreamingStopped);
            }
        }
    }

    Ok(())
}

/// Signals stop, cancels all transfers, sets mode OFF.
pub fn term_rx(device: &mut AirspyDevice) -> Result<()> {
    device.stop_requested.store(true, Ordering::Relaxed);
    device.ring.cancel();
    device.set_receiver_mode(ReceiverMode::Off)
}

/// Transfer completion handler, runs on the libusb event-pump thread.
///
/// 1. If not streaming or stop requested: return without resubmitting.
/// 2. If completed with the full requested length: convert, build a
///    `SampleBlock`, invoke the user callback, resubmit.
/// 3. Otherwise: stop streaming.
extern "system" fn transfer_callback(transfer: *mut libusb_transfer) {
    // SAFETY: `user_data` was set to the owning `AirspyDevice` itself in
    // `init_rx` and stays valid for as long as the ring is submitted
    // (the caller holds `&mut AirspyDevice` across init_rx/do_rx/term_rx);
    // this mirrors the teacher's `input_stream_proc`, which recovers its
    // Rust context the same way (`&mut *(user as *mut RtpInputStream)`).
    let device = unsafe { &mut *((*transfer).user_data as *mut AirspyDevice) };

    if !device.streaming.load(Ordering::Relaxed) || device.stop_requested.load(Ordering::Relaxed) {
        return;
    }

    let status = unsafe { (*transfer).status };
    let length = unsafe { (*transfer).length };
    let actual_length = unsafe { (*transfer).actual_length };

    if crate::ring::transfer_completed(status) && actual_length == length {
        let buffer_size = actual_length as usize;
        let raw = unsafe {
            std::slice::from_raw_parts_mut((*transfer).buffer, buffer_size)
        };

        // Read the callback and its opaque context out as plain values
        // before touching `device.unpack_scratch`/`device.converter`: the
        // packed path below takes a `&mut` borrow of `device.unpack_scratch`
        // that stays alive through the call to `cb`, so `cb`/`cb_ctx` must
        // not be read through `device` again while that borrow is live.
        let cb = device.callback;
        let cb_ctx = device.callback_ctx;

        let callback_result = if device.packing_enabled() {
            let words = bytes_to_words(raw);
            let unpacked = codec::unpack(&words);
            let scratch = &mut device.unpack_scratch[..unpacked.len()];
            scratch.copy_from_slice(&unpacked);
            device.converter.process(scratch);
            let sample_count = scratch.len() / 2;
            let signed: &[i16] = bytemuck_cast(scratch);
            let block = SampleBlock { samples: signed, sample_count };
            invoke_callback(cb, cb_ctx, &block)
        } else {
            let samples: &mut [u16] = bytes_as_u16_mut(raw);
            device.converter.process(samples);
            let sample_count = buffer_size / 4;
            let signed: &[i16] = bytemuck_cast(samples);
            let block = SampleBlock { samples: signed, sample_count };
            invoke_callback(cb, cb_ctx, &block)
        };

        if callback_result != 0 {
            device.stop_requested.store(true, Ordering::Relaxed);
        }

        // SAFETY: the transfer descriptor is unchanged (same buffer,
        // endpoint, callback, user_data) from the original submission.
        let rc = unsafe { libusb1_sys::libusb_submit_transfer(transfer) };
        if rc != 0 {
            device.streaming.store(false, Ordering::Relaxed);
        }
    } else {
        device.streaming.store(false, Ordering::Relaxed);
    }
}

fn invoke_callback(cb: Option<RxCallback>, cb_ctx: *mut c_void, block: &SampleBlock) -> i32 {
    match cb {
        Some(cb) => cb(block, cb_ctx),
        None => 0,
    }
}

/// Parses a little-endian 32-bit word stream out of `buf` byte-by-byte.
/// The transfer buffer is a plain `Vec<u8>`-backed allocation with no
/// guaranteed 4-byte alignment, so this reads through `u32::from_le_bytes`
/// rather than reinterpreting the buffer in place.
fn bytes_to_words(buf: &[u8]) -> Vec<u32> {
    buf.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn bytes_as_u16_mut(buf: &mut [u8]) -> &mut [u16] {
    // SAFETY: unpacked wire buffers are always a multiple of 2 bytes.
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut u16, buf.len() / 2) }
}

fn bytemuck_cast(samples: &[u16]) -> &[i16] {
    // SAFETY: u16 and i16 share size and alignment.
    unsafe { std::slice::from_raw_parts(samples.as_ptr() as *const i16, samples.len()) }
}
