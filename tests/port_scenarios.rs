//! Scenario tests for the port buffer-exchange protocol

use std::sync::Arc;

use bufport::{
    BufferAllocator, BufferRef, Direction, HeapAllocator, PoolAllocator, Port, PortDefinition,
};

fn input_port(actual: usize, size: usize) -> Port {
    Port::with_name("encoder.in", PortDefinition::new(Direction::Input, 1, actual, size)).unwrap()
}

#[cfg(test)]
mod port_scenarios {
    use super::*;

    /// Three buffers of 4096 bytes: three checkouts, then backpressure,
    /// then availability again after a release
    #[test]
    fn scenario_checkout_backpressure_release() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        let port = input_port(3, 4096);
        for _ in 0..3 {
            port.allocate_buffer(&allocator, 4096).unwrap();
        }
        assert!(port.is_allocated());

        let taken: Vec<BufferRef> = (0..3)
            .map(|_| port.allocate_next_buffer().expect("free buffer"))
            .collect();
        assert!(taken.iter().all(|b| b.is_in_use()));
        assert!(port.allocate_next_buffer().is_none());

        port.release_buffer(&taken[1]).unwrap();
        let next = port.allocate_next_buffer().expect("released buffer is available");
        assert_eq!(next.header_id(), taken[1].header_id());

        let stats = port.stats();
        assert_eq!(stats.checkouts, 4);
        assert_eq!(stats.backpressure, 1);
    }

    /// Registering fewer than the actual count leaves the port unallocated
    #[test]
    fn scenario_partial_registration() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        for actual in 1..=5 {
            let port = input_port(actual, 256);
            for registered in 0..actual {
                assert!(!port.is_allocated(), "{} of {}", registered, actual);
                port.allocate_buffer(&allocator, 256).unwrap();
            }
            assert!(port.is_allocated());
        }
    }

    /// Checkout never hands out a buffer twice
    #[test]
    fn scenario_checkout_is_exclusive() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        let port = input_port(8, 64);
        for _ in 0..8 {
            port.allocate_buffer(&allocator, 64).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(buffer) = port.allocate_next_buffer() {
            assert!(!seen.contains(&buffer.header_id()));
            seen.push(buffer.header_id());
        }
        assert_eq!(seen.len(), 8);
    }

    /// Pop order equals push order for interleaved pushes and pops
    #[test]
    fn scenario_fifo_order() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        let port = input_port(6, 64);
        let buffers: Vec<BufferRef> = (0..6)
            .map(|_| port.allocate_buffer(&allocator, 64).unwrap())
            .collect();

        let mut pushed = Vec::new();
        let mut popped = Vec::new();
        for (i, buffer) in buffers.iter().enumerate() {
            port.push_buffer(buffer).unwrap();
            pushed.push(buffer.header_id());
            if i % 2 == 1 {
                popped.push(port.pop_buffer().unwrap().header_id());
            }
        }
        while let Some(buffer) = port.pop_buffer() {
            popped.push(buffer.header_id());
        }
        assert_eq!(pushed, popped);
    }

    /// Clearing the queue always leaves it empty
    #[test]
    fn scenario_queue_clear() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        let port = input_port(4, 64);
        for depth in 0..=4 {
            for i in 0..depth {
                let buffer = port
                    .allocated_buffer_at(i)
                    .or_else(|_| port.allocate_buffer(&allocator, 64))
                    .unwrap();
                port.push_buffer(&buffer).unwrap();
            }
            port.buffer_queue_clear();
            assert_eq!(port.buffer_queue_count(), 0);
        }
    }

    /// Pool-backed ports surface allocator exhaustion as a resource error
    #[test]
    fn scenario_allocator_exhaustion() {
        let pool = Arc::new(PoolAllocator::new(1024, 2, 64).unwrap());
        let allocator: Arc<dyn BufferAllocator> = pool.clone();
        let port = input_port(3, 1024);

        port.allocate_buffer(&allocator, 1024).unwrap();
        port.allocate_buffer(&allocator, 1024).unwrap();
        let err = port.allocate_buffer(&allocator, 1024).unwrap_err();
        assert!(err.is_resource());
        assert_eq!(port.buffer_count(), 2);

        port.teardown().unwrap();
        assert_eq!(pool.free_blocks(), 2);
    }

    /// Dropping a port returns its storage to the allocator
    #[test]
    fn scenario_drop_frees_storage() {
        let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
        {
            let port = input_port(4, 128);
            for _ in 0..4 {
                port.allocate_buffer(&allocator, 128).unwrap();
            }
            assert_eq!(allocator.outstanding(), 4);
        }
        assert_eq!(allocator.outstanding(), 0);
    }
}
