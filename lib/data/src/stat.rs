use serde::Serialize;

/// Counters describing the communication work of partitioning switches.
///
/// Updated by the executor and the container layer; element counts are in
/// elements, byte counts in bytes.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SwitchStat {
    pub switches: u64,

    pub send_count: u64,
    pub sent_bytes: u64,
    pub recv_count: u64,
    pub received_bytes: u64,
    pub reduce_count: u64,
    pub reduced_bytes: u64,

    pub copy_count: u64,
    pub copied_bytes: u64,
    pub init_count: u64,
    pub initialized_bytes: u64,
}

impl SwitchStat {
    pub fn add_sent(&mut self, elems: u64, elemsize: usize) {
        self.send_count += 1;
        self.sent_bytes += elems * elemsize as u64;
    }

    pub fn add_received(&mut self, elems: u64, elemsize: usize) {
        self.recv_count += 1;
        self.received_bytes += elems * elemsize as u64;
    }

    pub fn add_reduced(&mut self, elems: u64, elemsize: usize) {
        self.reduce_count += 1;
        self.reduced_bytes += elems * elemsize as u64;
    }

    pub fn add_copied(&mut self, elems: u64, elemsize: usize) {
        self.copy_count += 1;
        self.copied_bytes += elems * elemsize as u64;
    }

    pub fn add_initialized(&mut self, elems: u64, elemsize: usize) {
        self.init_count += 1;
        self.initialized_bytes += elems * elemsize as u64;
    }
}
