//! Local nonce accounting.
//!
//! The node is consulted once per address ("latest" tag); after that every
//! enqueued transaction takes its nonce from this book. Callers coordinate so
//! that no two tasks reserve for the same address concurrently.

use alloy::primitives::Address;
use dashmap::DashMap;

use crate::error::Result;
use crate::rpc::RpcClient;

#[derive(Debug, Default)]
pub struct NonceBook {
    next: DashMap<Address, u64>,
}

impl NonceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an address from the node's `latest` transaction count.
    pub async fn initialize(&self, client: &RpcClient, address: Address) -> Result<u64> {
        let count = client.get_tx_count(address, "latest").await?;
        self.next.insert(address, count);
        Ok(count)
    }

    pub fn seed(&self, address: Address, next_nonce: u64) {
        self.next.insert(address, next_nonce);
    }

    pub fn peek(&self, address: Address) -> Option<u64> {
        self.next.get(&address).map(|v| *v)
    }

    /// Reserve `n` consecutive nonces, returning the first. The address must
    /// have been initialized or seeded beforehand.
    pub fn reserve(&self, address: Address, n: u64) -> u64 {
        let mut entry = self.next.entry(address).or_insert(0);
        let base = *entry;
        *entry = base.saturating_add(n);
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn reserve_returns_contiguous_blocks() {
        let book = NonceBook::new();
        book.seed(addr(1), 7);

        assert_eq!(book.reserve(addr(1), 3), 7);
        assert_eq!(book.reserve(addr(1), 2), 10);
        assert_eq!(book.peek(addr(1)), Some(12));
    }

    #[test]
    fn addresses_do_not_interfere() {
        let book = NonceBook::new();
        book.seed(addr(1), 100);
        book.seed(addr(2), 5);

        assert_eq!(book.reserve(addr(1), 1), 100);
        assert_eq!(book.reserve(addr(2), 1), 5);
        assert_eq!(book.peek(addr(1)), Some(101));
        assert_eq!(book.peek(addr(2)), Some(6));
    }

    #[test]
    fn zero_reservation_does_not_advance() {
        let book = NonceBook::new();
        book.seed(addr(3), 42);
        assert_eq!(book.reserve(addr(3), 0), 42);
        assert_eq!(book.peek(addr(3)), Some(42));
    }
}
