//! Message-ID generation.
//!
//! Every ID is 19 ASCII characters:
//!
//! ```text
//!  I D :  h h h h  t t t t t t t t  c c c c
//!  0 1 2  3 . . 6  7 . . . . . . 14 15 . 18
//!         │        │                └── rolling 20-bit counter
//!         │        └── 40-bit time, in 4 ms ticks since the epoch
//!         └── 20 bits of a CRC-32 unique to this producer
//! ```
//!
//! All three segments use the base-32 digits `0-9A-V`, most significant
//! digit first, so IDs from one producer sort by time.
//!
//! The clock is read on every call, but the time digits are only rewritten
//! when the tick has moved on. The counter digits are always rewritten,
//! which is what keeps two IDs from the same tick apart. If the counter
//! wraps within one tick the time segment is pushed forward by one tick,
//! so uniqueness never depends on the clock advancing.

use std::time::{SystemTime, UNIX_EPOCH};

const BASE32: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

const ID_LEN: usize = 19;
const HASH_START: usize = 3;
const TIME_START: usize = 7;
const COUNTER_START: usize = 15;

const COUNTER_MASK: u32 = 0xF_FFFF;
const TICK_MASK: u64 = (1 << 40) - 1;

/// Per-producer message-ID source.
#[derive(Debug, Clone)]
pub struct MessageIdGenerator {
    buf: [u8; ID_LEN],
    counter: u32,
    last_tick: u64,
}

impl MessageIdGenerator {
    /// Creates a generator for a producer on the connection `client_id`.
    ///
    /// The producer-unique segment mixes the client ID, the current time
    /// and a random salt.
    pub fn new(client_id: &str) -> Self {
        Self::with_salt(client_id, rand::random(), now_millis())
    }

    pub(crate) fn with_salt(client_id: &str, salt: u32, now_ms: u64) -> Self {
        let mut crc = crc32fast::Hasher::new();
        crc.update(client_id.as_bytes());
        crc.update(&[((now_ms / 77) & 0xff) as u8]);
        crc.update(&[((now_ms / 79_731) & 0xff) as u8]);
        crc.update(&salt.to_be_bytes());

        let mut buf = [b'0'; ID_LEN];
        buf[..HASH_START].copy_from_slice(b"ID:");
        write_base32(&mut buf[HASH_START..TIME_START], u64::from(crc.finalize()));
        Self {
            buf,
            counter: 0,
            last_tick: 0,
        }
    }

    /// Returns the next ID.
    pub fn next_id(&mut self) -> String {
        self.next_at(now_millis())
    }

    fn next_at(&mut self, now_ms: u64) -> String {
        self.counter = (self.counter + 1) & COUNTER_MASK;
        let tick = (now_ms >> 2) & TICK_MASK;
        if tick > self.last_tick {
            self.last_tick = tick;
            self.write_time();
        } else if self.counter == 0 {
            self.last_tick = (self.last_tick + 1) & TICK_MASK;
            self.write_time();
        }
        write_base32(
            &mut self.buf[COUNTER_START..],
            u64::from(self.counter),
        );
        self.buf.iter().map(|&b| char::from(b)).collect()
    }

    fn write_time(&mut self) {
        write_base32(&mut self.buf[TIME_START..COUNTER_START], self.last_tick);
    }

    /// How many IDs have been issued, modulo 2^20.
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// Writes the low `5 * out.len()` bits of `value`, most significant first.
fn write_base32(out: &mut [u8], mut value: u64) {
    for slot in out.iter_mut().rev() {
        *slot = BASE32[(value & 0x1f) as usize];
        value >>= 5;
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const T0: u64 = 1_700_000_000_000;

    fn time_segment(id: &str) -> &str {
        &id[TIME_START..COUNTER_START]
    }

    #[test]
    fn test_next_id_has_fixed_shape() {
        let mut generator = MessageIdGenerator::new("client-a");
        let id = generator.next_id();

        assert_eq!(id.len(), ID_LEN);
        assert!(id.starts_with("ID:"));
        assert!(id[3..].bytes().all(|b| BASE32.contains(&b)));
    }

    #[test]
    fn test_next_id_same_tick_ids_differ() {
        let mut generator = MessageIdGenerator::with_salt("c", 1, T0);
        let a = generator.next_at(T0);
        let b = generator.next_at(T0);

        assert_ne!(a, b);
        assert_eq!(time_segment(&a), time_segment(&b));
        assert_eq!(&a[..TIME_START], &b[..TIME_START]);
    }

    #[test]
    fn test_next_id_time_segment_is_monotonic() {
        let mut generator = MessageIdGenerator::with_salt("c", 1, T0);
        let mut previous = String::new();
        // The clock steps backwards once in the middle.
        for now in [T0, T0 + 4, T0 + 9, T0 + 2, T0 + 100, T0 + 100] {
            let id = generator.next_at(now);
            let segment = time_segment(&id).to_string();
            assert!(segment >= previous, "{segment} < {previous}");
            previous = segment;
        }
    }

    #[test]
    fn test_next_id_many_calls_are_distinct() {
        let mut generator = MessageIdGenerator::with_salt("c", 7, T0);
        let ids: HashSet<String> = (0..10_000).map(|i| generator.next_at(T0 + i / 50)).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_next_id_counter_wrap_bumps_time() {
        let mut generator = MessageIdGenerator::with_salt("c", 1, T0);
        let first = generator.next_at(T0);
        generator.counter = COUNTER_MASK;

        let wrapped = generator.next_at(T0);

        assert_eq!(generator.counter(), 0);
        assert_ne!(first, wrapped);
        assert!(time_segment(&wrapped) > time_segment(&first));
    }

    #[test]
    fn test_with_salt_hash_uses_every_salt_byte() {
        let low = MessageIdGenerator::with_salt("c", 0x0000_0001, T0).next_at(T0);
        let high = MessageIdGenerator::with_salt("c", 0x0100_0001, T0).next_at(T0);
        let middle = MessageIdGenerator::with_salt("c", 0x0001_0001, T0).next_at(T0);
        assert_ne!(&low[HASH_START..TIME_START], &high[HASH_START..TIME_START]);
        assert_ne!(&low[HASH_START..TIME_START], &middle[HASH_START..TIME_START]);
    }

    #[test]
    fn test_with_salt_hash_depends_on_client_id() {
        let a = MessageIdGenerator::with_salt("alpha", 1, T0).next_at(T0);
        let b = MessageIdGenerator::with_salt("beta", 1, T0).next_at(T0);
        assert_ne!(&a[HASH_START..TIME_START], &b[HASH_START..TIME_START]);
    }

    #[test]
    fn test_write_base32_most_significant_first() {
        let mut out = [0u8; 4];
        write_base32(&mut out, 32 * 32 + 31);
        assert_eq!(&out, b"010V");
    }
}
