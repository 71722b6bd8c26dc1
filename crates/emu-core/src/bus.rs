//! Memory and I/O bus interface.

/// Memory and I/O bus interface.
///
/// The CPU accesses memory and peripherals through this trait. The bus
/// handles address decoding and routing to the appropriate device; on the
/// Spectrum that includes ROM/RAM paging and the partially-decoded I/O
/// port map.
pub trait Bus {
    /// Read a byte from the given memory address.
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to the given memory address. ROM writes are ignored.
    fn write(&mut self, addr: u16, value: u8);

    /// Read a byte from an I/O port (full 16-bit port address).
    fn io_read(&mut self, port: u16) -> u8;

    /// Write a byte to an I/O port (full 16-bit port address).
    fn io_write(&mut self, port: u16, value: u8);
}

/// Flat 64 KiB RAM bus for tests: no paging, I/O reads return the last
/// value written to the same 8-bit port (0xFF before any write).
pub struct SimpleBus {
    pub mem: Box<[u8; 0x1_0000]>,
    pub ports: Box<[u8; 0x100]>,
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mem: Box::new([0; 0x1_0000]),
            ports: Box::new([0xFF; 0x100]),
        }
    }

    /// Copy a program into memory at the given address.
    pub fn load(&mut self, addr: u16, data: &[u8]) {
        let start = addr as usize;
        self.mem[start..start + data.len()].copy_from_slice(data);
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.mem[addr as usize] = value;
    }

    fn io_read(&mut self, port: u16) -> u8 {
        self.ports[(port & 0xFF) as usize]
    }

    fn io_write(&mut self, port: u16, value: u8) {
        self.ports[(port & 0xFF) as usize] = value;
    }
}
