// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Property-based tests: ring buffer
//!
//! Generates capacities and operation sequences and checks the buffer against
//! a `VecDeque` model.
//!
//! # Coverage
//!
//! - **Capacity rounding:** capacity is the next power of two of the request,
//!   and rounding is idempotent.
//! - **FIFO order:** everything pushed comes back out in push order.
//! - **Occupancy:** `len` never exceeds capacity and `try_push` refuses exactly
//!   when the buffer is full.

#[cfg(test)]
mod tests {
    use logpipe::logging::{next_power_of_two, RingBuffer};
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    enum Op {
        Push(u32),
        Take,
        TakeBatch(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<u32>().prop_map(Op::Push),
            1 => Just(Op::Take),
            1 => (0usize..8).prop_map(Op::TakeBatch),
        ]
    }

    proptest! {
        /// **Property:** capacity is a power of two, at least the request and
        /// less than twice it.
        #[test]
        fn test_capacity_rounding(size in 1usize..100_000) {
            let ring: RingBuffer<u8> = RingBuffer::new(size);
            let capacity = ring.capacity();
            prop_assert!(capacity.is_power_of_two());
            prop_assert!(capacity >= size);
            prop_assert!(capacity < size * 2);
            prop_assert_eq!(capacity, next_power_of_two(size));
        }

        #[test]
        fn test_next_power_of_two_idempotent(n in 0usize..(1usize << 40)) {
            let once = next_power_of_two(n);
            prop_assert_eq!(next_power_of_two(once), once);
            prop_assert!(once >= n.max(1));
        }

        /// **Property:** draining returns every pushed item in push order.
        #[test]
        fn test_fifo(items in prop::collection::vec(any::<u64>(), 0..256)) {
            let ring = RingBuffer::new(256);
            for item in &items {
                prop_assert!(ring.try_push(*item).is_ok());
            }
            prop_assert_eq!(ring.drain(), items);
            prop_assert!(ring.is_empty());
        }

        /// **Property:** an arbitrary mix of pushes and takes behaves like a
        /// bounded queue.
        #[test]
        fn test_matches_bounded_queue(
            size in 1usize..16,
            ops in prop::collection::vec(op(), 0..200),
        ) {
            let ring = RingBuffer::new(size);
            let capacity = ring.capacity();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Push(value) => {
                        let pushed = ring.try_push(value);
                        if model.len() < capacity {
                            prop_assert!(pushed.is_ok());
                            model.push_back(value);
                        } else {
                            prop_assert_eq!(pushed, Err(value));
                        }
                    }
                    Op::Take => {
                        prop_assert_eq!(ring.take(), model.pop_front());
                    }
                    Op::TakeBatch(max) => {
                        let expected: Vec<u32> =
                            (0..max.min(model.len())).filter_map(|_| model.pop_front()).collect();
                        prop_assert_eq!(ring.take_batch(max), expected);
                    }
                }
                prop_assert_eq!(ring.len(), model.len());
                prop_assert!(ring.len() <= capacity);
            }
        }
    }
}
