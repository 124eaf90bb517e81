//! Saturating diagnostic counters.

/// Counters bumped by the engine when it recovers from a fault locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Counter {
    MpRxTimeout,
    MpTxTimeout,
    LateCts,
    LateEom,
    LateAbort,
    LateTransfer,
    FastPacketDrops,
    MallocFailures,
    UnknownPgn,
    DecodeErrors,
    TxQueueFull,
    NodeTableFull,
    SessionTableFull,
}

/// Communication statistics. All counters saturate at `u16::MAX`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommStats {
    pub mp_rx_timeout: u16,
    pub mp_tx_timeout: u16,
    pub late_cts: u16,
    pub late_eom: u16,
    pub late_abort: u16,
    pub late_transfer: u16,
    pub fast_packet_drops: u16,
    /// Highest number of transport sessions open at once.
    pub max_active_sessions: u16,
    pub malloc_failures: u16,
    /// Lowest free arena size observed, in bytes.
    pub heap_free_min: u32,
    pub unknown_pgn: u16,
    pub decode_errors: u16,
    pub tx_queue_full: u16,
    pub node_table_full: u16,
    /// Transfers refused because every reassembly slot was busy.
    pub session_table_full: u16,
}

impl CommStats {
    pub const fn new() -> Self {
        Self {
            mp_rx_timeout: 0,
            mp_tx_timeout: 0,
            late_cts: 0,
            late_eom: 0,
            late_abort: 0,
            late_transfer: 0,
            fast_packet_drops: 0,
            max_active_sessions: 0,
            malloc_failures: 0,
            heap_free_min: u32::MAX,
            unknown_pgn: 0,
            decode_errors: 0,
            tx_queue_full: 0,
            node_table_full: 0,
            session_table_full: 0,
        }
    }

    /// Increment one counter.
    pub fn bump(&mut self, counter: Counter) {
        let slot = match counter {
            Counter::MpRxTimeout => &mut self.mp_rx_timeout,
            Counter::MpTxTimeout => &mut self.mp_tx_timeout,
            Counter::LateCts => &mut self.late_cts,
            Counter::LateEom => &mut self.late_eom,
            Counter::LateAbort => &mut self.late_abort,
            Counter::LateTransfer => &mut self.late_transfer,
            Counter::FastPacketDrops => &mut self.fast_packet_drops,
            Counter::MallocFailures => &mut self.malloc_failures,
            Counter::UnknownPgn => &mut self.unknown_pgn,
            Counter::DecodeErrors => &mut self.decode_errors,
            Counter::TxQueueFull => &mut self.tx_queue_full,
            Counter::NodeTableFull => &mut self.node_table_full,
            Counter::SessionTableFull => &mut self.session_table_full,
        };
        *slot = slot.saturating_add(1);
    }

    /// Record the number of concurrently open transport sessions.
    pub fn note_active_sessions(&mut self, active: usize) {
        let active = u16::try_from(active).unwrap_or(u16::MAX);
        self.max_active_sessions = self.max_active_sessions.max(active);
    }

    /// Mirror the allocator's own counters.
    pub fn note_heap(&mut self, free_low_water: usize, malloc_failures: u16) {
        let low = u32::try_from(free_low_water).unwrap_or(u32::MAX);
        self.heap_free_min = self.heap_free_min.min(low);
        self.malloc_failures = self.malloc_failures.max(malloc_failures);
    }
}
