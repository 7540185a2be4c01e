//! Simulated serial devices for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::eefc::*;
use crate::protocol::{checksum, ResponseType};
use crate::transport::Transport;
use crate::Options;

pub(crate) type MockError = std::io::ErrorKind;

pub(crate) struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

/// Device side of a simulated port, fed one byte at a time
pub(crate) trait Responder {
    fn receive(&mut self, byte: u8) -> Vec<u8>;
}

pub(crate) struct Silent;

impl Responder for Silent {
    fn receive(&mut self, _byte: u8) -> Vec<u8> {
        Vec::new()
    }
}

struct SimState<R> {
    responder: R,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    read_errors: usize,
    write_errors: usize,
}

/// Port handle shared between the code under test and the test body
pub(crate) struct SimPort<R> {
    state: Rc<RefCell<SimState<R>>>,
}

impl<R> Clone for SimPort<R> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

pub(crate) type ScriptedPort = SimPort<Silent>;

impl ScriptedPort {
    pub fn new() -> Self {
        SimPort::with_responder(Silent)
    }
}

impl<R: Responder> SimPort<R> {
    pub fn with_responder(responder: R) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                responder,
                rx: VecDeque::new(),
                tx: Vec::new(),
                read_errors: 0,
                write_errors: 0,
            })),
        }
    }

    /// Make bytes available for reading
    pub fn queue(&self, data: &[u8]) {
        self.state.borrow_mut().rx.extend(data.iter().copied());
    }

    /// Everything written so far
    pub fn sent(&self) -> Vec<u8> {
        self.state.borrow().tx.clone()
    }

    /// Fail the next `n` reads with a port error
    pub fn fail_reads(&self, n: usize) {
        self.state.borrow_mut().read_errors = n;
    }

    /// Fail the next `n` writes with a broken pipe
    pub fn fail_writes(&self, n: usize) {
        self.state.borrow_mut().write_errors = n;
    }

    pub fn device<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.state.borrow_mut().responder)
    }
}

impl<R: Responder> Read<u8> for SimPort<R> {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut s = self.state.borrow_mut();
        if s.read_errors > 0 {
            s.read_errors -= 1;
            return Err(nb::Error::Other(std::io::ErrorKind::Interrupted));
        }
        s.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl<R: Responder> Write<u8> for SimPort<R> {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        let mut s = self.state.borrow_mut();
        if s.write_errors > 0 {
            s.write_errors -= 1;
            return Err(nb::Error::Other(std::io::ErrorKind::BrokenPipe));
        }
        s.tx.push(word);
        let reply = s.responder.receive(word);
        s.rx.extend(reply);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

pub(crate) fn transport<R: Responder>(port: &SimPort<R>) -> Transport<SimPort<R>, NoDelay, MockError> {
    let options = Options {
        response_timeout_ms: 20,
        poll_delay_ms: 1,
        read_timeout_ms: 1,
    };
    Transport::new(port.clone(), NoDelay, options)
}

pub(crate) const SIM_EEFC: u32 = 0x400E_0A00;
pub(crate) const SIM_FLASH: u32 = 0x0040_0000;
pub(crate) const SIM_CIDR_ADDR: u32 = 0x400E_0740;
pub(crate) const SIM_EXID_ADDR: u32 = 0x400E_0744;
pub(crate) const SIM_PAGE_SIZE: usize = 512;
pub(crate) const SIM_FLASH_SIZE: usize = 64 * 1024;
pub(crate) const SIM_LOCK_SIZE: usize = 8 * 1024;

/// SAM-BA monitor with an embedded flash controller behind it
pub(crate) struct SamBaSim {
    pub bootloader: bool,
    pub cidr: u32,
    pub exid: u32,
    pub flash: Vec<u8>,
    pub locks: Vec<bool>,
    pub gpnvm: u32,
    /// Controller commands as (command, argument)
    pub commands: Vec<(u8, u32)>,
    /// Number of "not ready" polls before each command completes
    pub busy_polls: u32,
    /// Flash offset that reads back inverted after being written
    pub corrupt: Option<usize>,
    pub flash_error: bool,
    pub jumps: Vec<u32>,
    pub window_reads: usize,
    pub registers: HashMap<u32, u32>,

    line: Vec<u8>,
    latch: Vec<u8>,
    results: VecDeque<u32>,
    status: u32,
    busy: u32,
}

impl SamBaSim {
    pub fn new() -> Self {
        Self {
            bootloader: true,
            cidr: 0x2997_0CE0,
            exid: 0,
            flash: vec![0xff; SIM_FLASH_SIZE],
            locks: vec![true; SIM_FLASH_SIZE / SIM_LOCK_SIZE],
            gpnvm: 0,
            commands: Vec::new(),
            busy_polls: 0,
            corrupt: None,
            flash_error: false,
            jumps: Vec::new(),
            window_reads: 0,
            registers: HashMap::new(),
            line: Vec::new(),
            latch: vec![0xff; SIM_PAGE_SIZE],
            results: VecDeque::new(),
            status: EEFC_FSR_FRDY,
            busy: 0,
        }
    }

    pub fn count(&self, cmd: u8) -> usize {
        self.commands.iter().filter(|(c, _)| *c == cmd).count()
    }

    fn flash_offset(addr: u32) -> Option<usize> {
        let end = SIM_FLASH + SIM_FLASH_SIZE as u32;
        if addr >= SIM_FLASH && addr < end {
            Some((addr - SIM_FLASH) as usize)
        } else {
            None
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        if let Some(offset) = Self::flash_offset(addr) {
            self.window_reads += 1;
            let mut b = [0u8; 4];
            b.copy_from_slice(&self.flash[offset..offset + 4]);
            return u32::from_le_bytes(b);
        }

        match addr {
            a if a == SIM_CIDR_ADDR => self.cidr,
            a if a == SIM_EXID_ADDR => self.exid,
            a if a == SIM_EEFC + EEFC_FSR => {
                if self.busy > 0 {
                    self.busy -= 1;
                    0
                } else {
                    self.status
                }
            }
            a if a == SIM_EEFC + EEFC_FRR => self.results.pop_front().unwrap_or(0),
            a => self.registers.get(&a).copied().unwrap_or(0),
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        if let Some(offset) = Self::flash_offset(addr) {
            let o = offset % SIM_PAGE_SIZE;
            self.latch[o..o + 4].copy_from_slice(&value.to_le_bytes());
            return;
        }

        if addr == SIM_EEFC + EEFC_FCR {
            assert_eq!(value >> 24, 0x5a, "missing flash command key");
            self.execute((value & 0xff) as u8, (value >> 8) & 0xffff);
        } else {
            self.registers.insert(addr, value);
        }
    }

    fn region_locked(&self, page: usize) -> bool {
        self.locks[page * SIM_PAGE_SIZE / SIM_LOCK_SIZE]
    }

    fn execute(&mut self, cmd: u8, arg: u32) {
        self.commands.push((cmd, arg));
        self.busy = self.busy_polls;
        self.status = EEFC_FSR_FRDY;

        match cmd {
            EEFC_FCMD_GETD => {
                let lock_count = self.locks.len() as u32;
                self.results.clear();
                self.results.extend(&[
                    0x0015_0200,
                    SIM_FLASH_SIZE as u32,
                    SIM_PAGE_SIZE as u32,
                    1,
                    SIM_FLASH_SIZE as u32,
                    lock_count,
                ]);
                for _ in 0..lock_count {
                    self.results.push_back(SIM_LOCK_SIZE as u32);
                }
            }
            EEFC_FCMD_WP => {
                let page = arg as usize;
                if self.region_locked(page) {
                    self.status |= EEFC_FSR_FLOCKE;
                } else if self.flash_error {
                    self.status |= EEFC_FSR_FLERR;
                } else {
                    let start = page * SIM_PAGE_SIZE;
                    self.flash[start..start + SIM_PAGE_SIZE].copy_from_slice(&self.latch);
                    if let Some(c) = self.corrupt {
                        if c >= start && c < start + SIM_PAGE_SIZE {
                            self.flash[c] = !self.flash[c];
                        }
                    }
                }
                self.latch = vec![0xff; SIM_PAGE_SIZE];
            }
            EEFC_FCMD_EPA => {
                let count = 4usize << (arg & 0x3);
                let first = (arg & !0x3) as usize;
                if self.region_locked(first) {
                    self.status |= EEFC_FSR_FLOCKE;
                } else {
                    let start = first * SIM_PAGE_SIZE;
                    let end = (start + count * SIM_PAGE_SIZE).min(SIM_FLASH_SIZE);
                    for b in &mut self.flash[start..end] {
                        *b = 0xff;
                    }
                }
            }
            EEFC_FCMD_EA => {
                if self.locks.iter().any(|l| *l) {
                    self.status |= EEFC_FSR_FLOCKE;
                } else {
                    self.flash = vec![0xff; SIM_FLASH_SIZE];
                }
            }
            EEFC_FCMD_SLB => self.locks[arg as usize] = true,
            EEFC_FCMD_CLB => self.locks[arg as usize] = false,
            EEFC_FCMD_SGPB => self.gpnvm |= 1 << arg,
            EEFC_FCMD_CGPB => self.gpnvm &= !(1 << arg),
            EEFC_FCMD_GGPB => {
                self.results.clear();
                self.results.push_back(self.gpnvm);
            }
            _ => self.status |= EEFC_FSR_CMDE,
        }
    }

    fn hex(s: &[u8]) -> u32 {
        let s = std::str::from_utf8(s).unwrap();
        u32::from_str_radix(s, 16).unwrap()
    }

    fn command(&mut self, line: &[u8]) -> Vec<u8> {
        match line[0] {
            b'N' => {
                if self.bootloader {
                    vec![0x0a, 0x0d]
                } else {
                    Vec::new()
                }
            }
            b'w' => {
                assert_eq!(line[9], b',');
                let addr = Self::hex(&line[1..9]);
                self.read_word(addr).to_le_bytes().to_vec()
            }
            b'W' => {
                assert_eq!(line[9], b',');
                let addr = Self::hex(&line[1..9]);
                let value = Self::hex(&line[10..18]);
                self.write_word(addr, value);
                Vec::new()
            }
            b'G' => {
                self.jumps.push(Self::hex(&line[1..9]));
                Vec::new()
            }
            c => panic!("unexpected monitor command {:?}", c as char),
        }
    }
}

impl Responder for SamBaSim {
    fn receive(&mut self, byte: u8) -> Vec<u8> {
        if byte != b'#' {
            self.line.push(byte);
            return Vec::new();
        }
        let line = std::mem::take(&mut self.line);
        self.command(&line)
    }
}

/// Badge firmware command interpreter
pub(crate) struct BadgeSim {
    /// Payloads (type + args) of every valid command received
    pub commands: Vec<Vec<u8>>,
    /// Replies (response type + data) returned in order, OK when empty
    pub replies: VecDeque<Vec<u8>>,
    /// Ignore this many reset requests before acknowledging
    pub deaf_resets: u32,
    pub resets: u32,
    buf: Vec<u8>,
}

impl BadgeSim {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            replies: VecDeque::new(),
            deaf_resets: 0,
            resets: 0,
            buf: Vec::new(),
        }
    }

    pub fn frame(payload: &[u8]) -> Vec<u8> {
        let mut f = vec![payload.len() as u8];
        f.extend_from_slice(payload);
        f.push(checksum(payload));
        f
    }
}

impl Responder for BadgeSim {
    fn receive(&mut self, byte: u8) -> Vec<u8> {
        self.buf.push(byte);

        if self.buf.len() == 1 && self.buf[0] == 0 {
            self.buf.clear();
            self.resets += 1;
            if self.deaf_resets > 0 {
                self.deaf_resets -= 1;
                return Vec::new();
            }
            return Self::frame(&[ResponseType::Reset as u8]);
        }

        let len = self.buf[0] as usize;
        if self.buf.len() < len + 2 {
            return Vec::new();
        }

        let frame = std::mem::take(&mut self.buf);
        let payload = &frame[1..=len];
        if checksum(payload) != frame[len + 1] {
            return Self::frame(&[ResponseType::CrcErr as u8]);
        }

        self.commands.push(payload.to_vec());
        let reply = self
            .replies
            .pop_front()
            .unwrap_or_else(|| vec![ResponseType::Ok as u8]);
        Self::frame(&reply)
    }
}
