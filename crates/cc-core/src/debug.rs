//! The debug-command engine.
//!
//! Every target interaction is a bulk transfer to the dongle's OUT
//! endpoint carrying a hand-assembled 8051 instruction sequence, with
//! the reply (if any) read back from the IN endpoint. This module owns
//! no USB state of its own — it borrows a [`Transport`] for the
//! duration of each call — and the byte sequences it emits are a wire
//! contract with the dongle firmware. Do not "clean them up" into
//! higher-level primitives; they are externally defined.

use crate::error::{Error, Result};
use crate::transport::{
    Protocol, Transport, VENDOR_PREPARE_DEBUG, VENDOR_PREPARE_READ, VENDOR_RESET,
    VENDOR_SET_CHIP_INFO,
};

/// Fixed bulk-out sequence that primes the dongle for a banked/near
/// flash read, sent once per [`DebugEngine::flash_read_start`].
const FLASH_READ_PRIME: [u8; 3] = [0x1F, 0x4A, 0x00];
/// Fixed bulk-out sequence that restores normal debug-command state,
/// sent once per [`DebugEngine::flash_read_end`].
const FLASH_READ_RESTORE: [u8; 3] = [0x1F, 0x4B, 0x00];

/// `CPU_HALTED` bit of the debug status byte.
pub const STATUS_CPU_HALTED: u8 = 0x20;
/// `DEBUG_LOCKED` bit of the debug status byte.
pub const STATUS_DEBUG_LOCKED: u8 = 0x02;

/// Single-byte debug command selecting a status read, sent as
/// `{0x1F, READ_STATUS}`.
const CMD_READ_STATUS: u8 = 0x34;
/// Single-byte debug command selecting a config read, sent as
/// `{0x1F, RD_CONFIG}`.
const CMD_RD_CONFIG: u8 = 0x24;
/// Prefix for a config write: `{0x4C, WR_CONFIG, value}`.
const CMD_WR_CONFIG_PREFIX: u8 = 0x4C;
const CMD_WR_CONFIG: u8 = 0x1D;
/// Debug-command prefix shared by the single-byte status/config reads.
const DBG_CMD_PREFIX: u8 = 0x1F;
/// Full-chip erase: `{0x1C, CHIP_ERASE}`.
const CMD_CHIP_ERASE_PREFIX: u8 = 0x1C;
const CMD_CHIP_ERASE: u8 = 0x14;

/// 8051 opcode for `MOVX A,@DPTR` (read external data memory into the
/// accumulator).
const OP_MOVX_A_DPTR: u8 = 0xE0;
/// 8051 opcode for `MOVX @DPTR,A` (write the accumulator to external
/// data memory).
const OP_MOVX_DPTR_A: u8 = 0xF0;
/// 8051 opcode for `INC DPTR`.
const OP_INC_DPTR: u8 = 0xA3;
/// 8051 opcode for `MOV A,#imm`.
const OP_MOV_A_IMM: u8 = 0x74;
/// 8051 opcode for `MOV DPTR,#imm16`.
const OP_MOV_DPTR_IMM16: u8 = 0x90;

/// Dongle framing prefix wrapping a `MOV DPTR,#imm16` load, per the
/// `0xBE 0x57 …` load-DPTR template.
const LOAD_DPTR_TEMPLATE_PREFIX: [u8; 2] = [0xBE, 0x57];
/// Fixed preamble opening every XDATA-access sequence.
const XDATA_PREAMBLE_PREFIX: [u8; 4] = [0x40, 0x55, 0x00, 0x72];
/// Total length of the XDATA-access preamble.
const XDATA_PREAMBLE_LEN: usize = 20;
/// Fixed footer closing every XDATA-access sequence.
const XDATA_FOOTER_PREFIX: [u8; 3] = [0xD4, 0x57, 0x90];
/// Total length of the XDATA-access footer.
const XDATA_FOOTER_LEN: usize = 10;
/// The "burst write" prefix opening a 1024-byte fast-flash-write bulk
/// transfer.
const BURST_WRITE_PREFIX: [u8; 3] = [0xEE, 0x84, 0x00];
/// How many `MOVX A,@DPTR; INC DPTR` iterations occur before the
/// "commit" bit toggles, batching the returned bytes.
const XDATA_READ_COMMIT_PERIOD: usize = 64;

fn xdata_preamble() -> [u8; XDATA_PREAMBLE_LEN] {
    let mut buf = [0u8; XDATA_PREAMBLE_LEN];
    buf[..XDATA_PREAMBLE_PREFIX.len()].copy_from_slice(&XDATA_PREAMBLE_PREFIX);
    buf
}

fn xdata_footer() -> [u8; XDATA_FOOTER_LEN] {
    let mut buf = [0u8; XDATA_FOOTER_LEN];
    buf[..XDATA_FOOTER_PREFIX.len()].copy_from_slice(&XDATA_FOOTER_PREFIX);
    buf
}

fn load_dptr_template(address: u16) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = LOAD_DPTR_TEMPLATE_PREFIX[0];
    buf[1] = LOAD_DPTR_TEMPLATE_PREFIX[1];
    buf[2] = OP_MOV_DPTR_IMM16;
    buf[3] = (address >> 8) as u8;
    buf[4] = address as u8;
    buf
}

/// Wraps a borrowed [`Transport`] with the dongle's debug-command
/// protocol. Constructed once per session by the programmer façade and
/// handed to per-family drivers and the flash engine.
pub struct DebugEngine<'t> {
    transport: &'t mut dyn Transport,
    endpoint_in: u8,
    endpoint_out: u8,
}

impl<'t> DebugEngine<'t> {
    /// Build an engine bound to the given transport and endpoint pair.
    pub fn new(transport: &'t mut dyn Transport, endpoint_in: u8, endpoint_out: u8) -> Self {
        DebugEngine {
            transport,
            endpoint_in,
            endpoint_out,
        }
    }

    fn bulk_command(&mut self, command: &[u8]) -> Result<()> {
        self.transport.bulk_write(self.endpoint_out, command)?;
        Ok(())
    }

    fn bulk_reply(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.transport.bulk_read(self.endpoint_in, buf)?;
        if n != buf.len() {
            return Err(Error::Transport(format!(
                "short bulk reply: expected {} bytes, got {}",
                buf.len(),
                n
            )));
        }
        Ok(())
    }

    /// Read the 1-byte debug status register.
    pub fn read_status(&mut self) -> Result<u8> {
        self.bulk_command(&[DBG_CMD_PREFIX, CMD_READ_STATUS])?;
        let mut reply = [0u8; 1];
        self.bulk_reply(&mut reply)?;
        Ok(reply[0])
    }

    /// Read the 1-byte debug configuration register.
    pub fn read_config(&mut self) -> Result<u8> {
        self.bulk_command(&[DBG_CMD_PREFIX, CMD_RD_CONFIG])?;
        let mut reply = [0u8; 1];
        self.bulk_reply(&mut reply)?;
        Ok(reply[0])
    }

    /// Write the 1-byte debug configuration register.
    pub fn write_config(&mut self, value: u8) -> Result<()> {
        self.bulk_command(&[CMD_WR_CONFIG_PREFIX, CMD_WR_CONFIG, value])
    }

    /// Issue a vendor `RESET` request: `halted = true` resets into debug
    /// mode (target stays halted), `false` resets and runs normally.
    pub fn reset(&mut self, halted: bool) -> Result<()> {
        let index = if halted { 1 } else { 0 };
        self.transport.control_write(VENDOR_RESET, 0, index, &[])
    }

    /// Enter debug mode: vendor `PREPARE_DEBUG` with no data, then
    /// vendor `SET_CHIP_INFO` carrying the chip name and debugger id.
    pub fn enter_debug_mode(&mut self, chip_name: &str, debugger_id: u16, protocol: Protocol) -> Result<()> {
        self.transport.control_write(VENDOR_PREPARE_DEBUG, 0, 0, &[])?;

        let len = match protocol {
            Protocol::Ti => 0x30,
            Protocol::Chipcon => 0x20,
        };
        let mut payload = vec![0u8; len];
        let name_bytes = chip_name.as_bytes();
        let name_len = name_bytes.len().min(payload.len());
        payload[..name_len].copy_from_slice(&name_bytes[..name_len]);

        let tag = b"DID:";
        payload[0x10..0x10 + tag.len()].copy_from_slice(tag);
        let id_str = format!("{:04X}", debugger_id);
        payload[0x15..0x15 + id_str.len()].copy_from_slice(id_str.as_bytes());

        self.transport.control_write(VENDOR_SET_CHIP_INFO, 1, 0, &payload)
    }

    /// Read `count` bytes from XDATA at `address` using the near-read
    /// opcode template (`MOVX A,@DPTR; INC DPTR`, repeated, with the
    /// commit bit toggled every [`XDATA_READ_COMMIT_PERIOD`] iterations
    /// and on the final iteration).
    pub fn read_xdata(&mut self, address: u16, count: usize) -> Result<Vec<u8>> {
        let mut command = Vec::new();
        command.extend_from_slice(&xdata_preamble());
        command.extend_from_slice(&load_dptr_template(address));

        for i in 0..count {
            let commit = (i + 1) % XDATA_READ_COMMIT_PERIOD == 0 || i + 1 == count;
            command.push(OP_MOVX_A_DPTR);
            command.push(if commit { 0x01 } else { 0x00 });
            command.push(OP_INC_DPTR);
        }
        command.extend_from_slice(&xdata_footer());

        self.bulk_command(&command)?;
        let mut reply = vec![0u8; count];
        self.bulk_reply(&mut reply)?;
        Ok(reply)
    }

    /// Write `data` to XDATA at `address` using the write template
    /// (`MOV A,#imm; MOVX @DPTR,A; INC DPTR`, repeated with `imm` taken
    /// from successive bytes of `data`).
    pub fn write_xdata(&mut self, address: u16, data: &[u8]) -> Result<()> {
        let mut command = Vec::new();
        command.extend_from_slice(&xdata_preamble());
        command.extend_from_slice(&load_dptr_template(address));

        for &byte in data {
            command.push(OP_MOV_A_IMM);
            command.push(byte);
            command.push(OP_MOVX_DPTR_A);
            command.push(OP_INC_DPTR);
        }
        command.extend_from_slice(&xdata_footer());
        self.bulk_command(&command)
    }

    /// Read one SFR byte.
    pub fn read_sfr(&mut self, address: u8) -> Result<u8> {
        let bytes = self.read_xdata(address as u16, 1)?;
        Ok(bytes[0])
    }

    /// Write one SFR byte.
    pub fn write_sfr(&mut self, address: u8, value: u8) -> Result<()> {
        self.write_xdata(address as u16, &[value])
    }

    /// Issue the full-chip-erase debug command: `{0x1C, CHIP_ERASE}`.
    pub fn chip_erase(&mut self) -> Result<()> {
        self.bulk_command(&[CMD_CHIP_ERASE_PREFIX, CMD_CHIP_ERASE])
    }

    /// Burst-write a 1024-byte block into one of the fast-write SRAM
    /// buffers: `{0xEE, 0x84, 0x00}` followed by the data.
    pub fn burst_write_block(&mut self, block: &[u8]) -> Result<()> {
        let mut command = Vec::with_capacity(BURST_WRITE_PREFIX.len() + block.len());
        command.extend_from_slice(&BURST_WRITE_PREFIX);
        command.extend_from_slice(block);
        self.bulk_command(&command)
    }

    /// Vendor `PREPARE_READ` request, reading the 1-byte reply.
    pub fn prepare_read(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.transport.control_read(VENDOR_PREPARE_READ, 0, 0, &mut buf)?;
        Ok(buf[0])
    }

    /// Begin a banked/near flash-read session: `PREPARE_READ` followed
    /// by the fixed priming bulk-out.
    pub fn flash_read_start(&mut self) -> Result<()> {
        self.prepare_read()?;
        self.bulk_command(&FLASH_READ_PRIME)
    }

    /// End a flash-read session, restoring normal debug-command state.
    pub fn flash_read_end(&mut self) -> Result<()> {
        self.bulk_command(&FLASH_READ_RESTORE)
    }
}

/// Decode the XDATA address and data bytes a [`DebugEngine::write_xdata`]
/// command encoded, for tests that need to inspect what a driver wrote
/// without re-deriving the wire format themselves.
#[cfg(test)]
pub(crate) fn decode_xdata_write(cmd: &[u8]) -> (u16, Vec<u8>) {
    let addr = ((cmd[XDATA_PREAMBLE_LEN + 3] as u16) << 8) | cmd[XDATA_PREAMBLE_LEN + 4] as u16;
    let body = &cmd[XDATA_PREAMBLE_LEN + 5..cmd.len() - XDATA_FOOTER_LEN];
    let bytes = body.chunks(4).map(|c| c[1]).collect();
    (addr, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeTransport {
        out_log: Vec<Vec<u8>>,
        in_queue: VecDeque<Vec<u8>>,
        control_writes: Vec<(u8, u16, u16, Vec<u8>)>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                out_log: Vec::new(),
                in_queue: VecDeque::new(),
                control_writes: Vec::new(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn set_transfer_timeout(&mut self, _timeout_ms: u32) {}
        fn reset_device(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_configuration(&mut self, _configuration: u8) -> Result<()> {
            Ok(())
        }
        fn claim_interface(&mut self, _interface: u8) -> Result<()> {
            Ok(())
        }
        fn release_interface(&mut self, _interface: u8) -> Result<()> {
            Ok(())
        }
        fn string_descriptor_ascii(&mut self, _index: u8) -> Result<String> {
            Ok(String::new())
        }
        fn bcd_device(&self) -> u16 {
            0x0100
        }
        fn clear_halt(&mut self, _endpoint: u8) -> Result<()> {
            Ok(())
        }
        fn bulk_read(&mut self, _endpoint: u8, buf: &mut [u8]) -> Result<usize> {
            let data = self.in_queue.pop_front().unwrap_or_default();
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }
        fn bulk_write(&mut self, _endpoint: u8, data: &[u8]) -> Result<usize> {
            self.out_log.push(data.to_vec());
            Ok(data.len())
        }
        fn control_read(&mut self, _request: u8, _value: u16, _index: u16, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
            self.control_writes.push((request, value, index, data.to_vec()));
            Ok(())
        }
        fn close(&mut self) {}
    }

    #[test]
    fn read_status_sends_expected_command() {
        let mut transport = FakeTransport::new();
        transport.in_queue.push_back(vec![STATUS_CPU_HALTED]);
        let mut engine = DebugEngine::new(&mut transport, 0x84, 0x04);
        let status = engine.read_status().unwrap();
        assert_eq!(status, STATUS_CPU_HALTED);
        assert_eq!(transport.out_log[0], vec![DBG_CMD_PREFIX, CMD_READ_STATUS]);
    }

    #[test]
    fn read_xdata_toggles_commit_bit_every_64_and_on_last() {
        let mut transport = FakeTransport::new();
        transport.in_queue.push_back(vec![0u8; 70]);
        let mut engine = DebugEngine::new(&mut transport, 0x84, 0x04);
        engine.read_xdata(0x1000, 70).unwrap();
        let cmd = &transport.out_log[0];
        // preamble(20) + load_dptr(5) + 70 * (movx, commit, inc) + footer(10)
        let body_start = XDATA_PREAMBLE_LEN + 5;
        let body = &cmd[body_start..body_start + 70 * 3];
        let commit_at = |i: usize| body[i * 3 + 1];
        assert_eq!(commit_at(63), 0x01); // 64th iteration (index 63)
        assert_eq!(commit_at(69), 0x01); // last iteration
        assert_eq!(commit_at(0), 0x00);
    }

    #[test]
    fn enter_debug_mode_places_did_tag_and_id() {
        let mut transport = FakeTransport::new();
        let mut engine = DebugEngine::new(&mut transport, 0x84, 0x04);
        engine.enter_debug_mode("CC2530", 0x1234, Protocol::Ti).unwrap();
        let (_, _, _, payload) = &transport.control_writes[1];
        assert_eq!(payload.len(), 0x30);
        assert_eq!(&payload[0..6], b"CC2530");
        assert_eq!(&payload[0x10..0x14], b"DID:");
        assert_eq!(&payload[0x15..0x19], b"1234");
    }
}
