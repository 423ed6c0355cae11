//! Concurrent stress tests for ports shared between threads
//! Tests focused on lost updates, exclusive checkout and blocking hand-off

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

use bufport::{
    tunnel::{self, BufferSupplier, TunnelEnd},
    BufferAllocator, BufferRef, Direction, HeapAllocator, Port, PortDefinition,
};

fn shared_port(count: usize) -> (Arc<Port>, Arc<dyn BufferAllocator>) {
    let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
    let port = Port::with_name(
        "stress.in",
        PortDefinition::new(Direction::Input, 1, count, 256),
    )
    .unwrap();
    for _ in 0..count {
        port.allocate_buffer(&allocator, 256).unwrap();
    }
    port.enable();
    (Arc::new(port), allocator)
}

#[cfg(test)]
mod concurrent_stress_tests {
    use super::*;

    /// Test: two threads push disjoint buffer sets; nothing is lost
    #[test]
    fn stress_concurrent_push_loses_nothing() {
        let (port, _allocator) = shared_port(64);
        let buffers: Vec<BufferRef> = (0..64).map(|i| port.allocated_buffer_at(i).unwrap()).collect();
        let barrier = Arc::new(Barrier::new(2));
        let pushed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = buffers
            .chunks(32)
            .map(|chunk| {
                let port = Arc::clone(&port);
                let chunk = chunk.to_vec();
                let barrier = Arc::clone(&barrier);
                let pushed = Arc::clone(&pushed);
                thread::spawn(move || {
                    barrier.wait();
                    for buffer in &chunk {
                        if port.push_buffer(buffer).is_ok() {
                            pushed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pushed.load(Ordering::Relaxed), 64);
        assert_eq!(port.buffer_queue_count(), 64);

        let mut seen = HashSet::new();
        while let Some(buffer) = port.pop_buffer() {
            assert!(seen.insert(buffer.header_id()));
        }
        assert_eq!(seen.len(), 64);
    }

    /// Test: many threads check out and release; a buffer is never held twice
    #[test]
    fn stress_exclusive_checkout() {
        let (port, _allocator) = shared_port(4);
        let thread_count = 8;
        let iterations = 500;
        let barrier = Arc::new(Barrier::new(thread_count));
        let holders: Arc<Vec<AtomicUsize>> = Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect());
        let violations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let port = Arc::clone(&port);
                let barrier = Arc::clone(&barrier);
                let holders = Arc::clone(&holders);
                let violations = Arc::clone(&violations);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..iterations {
                        let Some(buffer) = port.allocate_next_buffer() else {
                            thread::yield_now();
                            continue;
                        };
                        let slot = (0..4)
                            .find(|&s| port.allocated_buffer_at(s).unwrap().header_id() == buffer.header_id())
                            .unwrap();
                        if holders[slot].fetch_add(1, Ordering::AcqRel) != 0 {
                            violations.fetch_add(1, Ordering::Relaxed);
                        }
                        if i % 16 == 0 {
                            thread::yield_now();
                        }
                        holders[slot].fetch_sub(1, Ordering::AcqRel);
                        port.release_buffer(&buffer).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(violations.load(Ordering::Relaxed), 0);
        assert_eq!(port.checked_out_count(), 0);
        let stats = port.stats();
        assert_eq!(stats.checkouts, stats.releases);
    }

    /// Test: producer and consumer hand buffers over through the queue
    #[test]
    fn stress_producer_consumer_handoff() {
        let (port, _allocator) = shared_port(8);
        let total = 2_000;

        let producer = {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                let mut sent = 0;
                while sent < total {
                    match port.allocate_next_buffer() {
                        Some(buffer) => {
                            port.push_buffer(&buffer).unwrap();
                            sent += 1;
                        }
                        None => thread::yield_now(),
                    }
                }
            })
        };

        let consumer = {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                let mut received = 0;
                while received < total {
                    if port.wait_for_buffer(Duration::from_millis(100)).is_none() {
                        continue;
                    }
                    let buffer = port.pop_buffer().unwrap();
                    port.release_buffer(&buffer).unwrap();
                    received += 1;
                }
                received
            })
        };

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), total);
        assert_eq!(port.buffer_queue_count(), 0);
        assert_eq!(port.checked_out_count(), 0);
        assert!(port.stats().peak_queue_depth <= 8);
    }

    /// Test: disabling the port releases a consumer blocked on an empty queue
    #[test]
    fn stress_disable_interrupts_waiter() {
        let (port, _allocator) = shared_port(1);

        let waiter = {
            let port = Arc::clone(&port);
            thread::spawn(move || port.wait_for_buffer(Duration::from_secs(30)))
        };

        while !waiter.is_finished() {
            port.disable();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(waiter.join().unwrap().is_none());
    }

    /// Test: frames flow across a tunnel between two components' threads
    #[test]
    fn stress_tunnel_pipeline() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        let output = Arc::new(
            Port::with_name("camera.out", PortDefinition::new(Direction::Output, 2, 4, 1024)).unwrap(),
        );
        let input = Arc::new(
            Port::with_name("encoder.in", PortDefinition::new(Direction::Input, 2, 4, 1024)).unwrap(),
        );
        tunnel::connect(
            TunnelEnd::new(&output, "camera", 0),
            TunnelEnd::new(&input, "encoder", 0),
            BufferSupplier::Output,
        )
        .unwrap();
        tunnel::populate(&output, &input, &allocator).unwrap();
        output.enable();
        input.enable();
        assert!(output.is_ready() && input.is_ready());

        let frames = 500;
        let producer = {
            let (output, input) = (Arc::clone(&output), Arc::clone(&input));
            thread::spawn(move || {
                let mut sent = 0;
                while sent < frames {
                    while let Some(returned) = output.pop_buffer() {
                        output.release_buffer(&returned).unwrap();
                    }
                    match output.allocate_next_buffer() {
                        Some(buffer) => {
                            tunnel::forward_buffer(&output, &buffer, &input).unwrap();
                            sent += 1;
                        }
                        None => {
                            output.wait_for_buffer(Duration::from_millis(50));
                        }
                    }
                }
            })
        };

        let consumer = {
            let (output, input) = (Arc::clone(&output), Arc::clone(&input));
            thread::spawn(move || {
                let mut received = 0;
                while received < frames {
                    if input.wait_for_buffer(Duration::from_millis(100)).is_none() {
                        continue;
                    }
                    let buffer = input.pop_buffer().unwrap();
                    tunnel::forward_buffer(&input, &buffer, &output).unwrap();
                    received += 1;
                }
                received
            })
        };

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), frames);

        while let Some(returned) = output.pop_buffer() {
            output.release_buffer(&returned).unwrap();
        }
        assert_eq!(output.checked_out_count(), 0);
        assert_eq!(tunnel::depopulate(&output, &input).unwrap(), 4);
        assert_eq!(allocator.outstanding(), 0);
    }
}
