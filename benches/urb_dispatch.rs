//! URB Dispatch Benchmarks
//!
//! Measures `DeviceDispatcher::dispatch` throughput for the hottest
//! device-stream function codes (SUBMIT_URB control transfers and bulk
//! transfer requests) against the in-memory mock host stack, and the
//! per-device registration overhead in `UsbDeviceManager`.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rdp_usb_redirect::device::{DeviceDescriptor, UsbDeviceRecord};
use rdp_usb_redirect::dispatch::DeviceDispatcher;
use rdp_usb_redirect::frame::MessageHeader;
use rdp_usb_redirect::host::mock::MockHostStack;

fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: 0x0781,
        product_id: 0x5581,
        bcd_usb: 0x0200,
        device_class: 0,
        device_sub_class: 0,
        device_protocol: 0,
        interface_classes: vec![0x08],
        product_string: Some("Mass Storage".into()),
    }
}

fn control_transfer_submit_urb(request_id: u32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(0x0008); // ioctl::SUBMIT_URB
    buf.put_u32_le(request_id);
    buf.put_u16_le(0x0009); // urb_function::CONTROL_TRANSFER
    buf.put_u8(0x80); // endpoint 0, device-to-host
    buf.put_u8(0);
    // setup packet
    buf.put_u8(0x80);
    buf.put_u8(0x06);
    buf.put_u16_le(0x0100);
    buf.put_u16_le(0x0000);
    buf.put_u16_le(18);
    buf.freeze()
}

fn bulk_transfer_request(request_id: u32, payload_len: usize) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(request_id);
    buf.put_u8(0x81); // IN endpoint
    buf.extend_from_slice(&vec![0u8; payload_len]);
    buf.freeze()
}

fn bench_submit_urb_control_transfer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("urb_dispatch_control_transfer");

    group.bench_function("get_device_descriptor", |b| {
        let host = Arc::new(MockHostStack::default());
        let dispatcher = DeviceDispatcher::new(host);
        let device = Arc::new(UsbDeviceRecord::new(1, 1, 2, descriptor()));

        b.iter(|| {
            rt.block_on(async {
                let header = MessageHeader::new(rdp_usb_redirect::constants::StreamId::Proxy, 0, 5, rdp_usb_redirect::constants::device_function::IO_CONTROL);
                black_box(dispatcher.dispatch(&device, header, control_transfer_submit_urb(1)).await.unwrap())
            })
        })
    });

    group.finish();
}

fn bench_bulk_transfer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("urb_dispatch_bulk_transfer");

    for payload_len in [64usize, 4096, 65536] {
        group.throughput(Throughput::Bytes(payload_len as u64));
        group.bench_with_input(BenchmarkId::new("payload_bytes", payload_len), &payload_len, |b, &len| {
            let host = Arc::new(MockHostStack::default());
            let dispatcher = DeviceDispatcher::new(host);
            let device = Arc::new(UsbDeviceRecord::new(1, 1, 2, descriptor()));

            b.iter(|| {
                rt.block_on(async {
                    let header = MessageHeader::new(
                        rdp_usb_redirect::constants::StreamId::Proxy,
                        0,
                        7,
                        rdp_usb_redirect::constants::device_function::TRANSFER_IN_REQUEST,
                    );
                    black_box(dispatcher.dispatch(&device, header, bulk_transfer_request(2, len)).await.unwrap())
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit_urb_control_transfer, bench_bulk_transfer);
criterion_main!(benches);
