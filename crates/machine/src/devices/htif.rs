//! Host-Target Interface (HTIF).
//!
//! The guest talks to the host through the `tohost`/`fromhost` register
//! pair. A `tohost` write packs a device, a command and a payload:
//!
//! ```text
//!   63      56 55      48 47                            0
//!  +----------+----------+-------------------------------+
//!  |   DEV    |   CMD    |             DATA              |
//!  +----------+----------+-------------------------------+
//! ```
//!
//! Device 0 is halt (command 0, payload bit 0 halts the machine), device 1
//! is the console (getchar/putchar), device 2 is yield (manual/automatic).
//! The `ihalt`/`iconsole`/`iyield` registers hold one enable bit per
//! command; disabled commands still latch `tohost` but have no effect.
//! Console output lands in a host-drained buffer so the core performs no
//! I/O of its own.

use crate::common::constants::layout::HTIF_START;
use crate::config::HtifConfig;
use crate::machine::Machine;
use crate::state::ProcessorState;

/// Offset of the tohost register.
pub const TOHOST_OFFSET: u64 = 0x00;
/// Offset of the fromhost register.
pub const FROMHOST_OFFSET: u64 = 0x08;
/// Offset of the halt-device enable register.
pub const IHALT_OFFSET: u64 = 0x10;
/// Offset of the console-device enable register.
pub const ICONSOLE_OFFSET: u64 = 0x18;
/// Offset of the yield-device enable register.
pub const IYIELD_OFFSET: u64 = 0x20;

/// Physical address of the tohost register.
pub const TOHOST_ADDRESS: u64 = HTIF_START + TOHOST_OFFSET;

/// Halt device number.
pub const DEV_HALT: u64 = 0;
/// Console device number.
pub const DEV_CONSOLE: u64 = 1;
/// Yield device number.
pub const DEV_YIELD: u64 = 2;

/// Halt command.
pub const CMD_HALT: u64 = 0;
/// Console getchar command.
pub const CMD_GETCHAR: u64 = 0;
/// Console putchar command.
pub const CMD_PUTCHAR: u64 = 1;
/// Manual yield command.
pub const CMD_YIELD_MANUAL: u64 = 0;
/// Automatic yield command.
pub const CMD_YIELD_AUTOMATIC: u64 = 1;

/// Builds an HTIF request or acknowledge word.
pub const fn pack(dev: u64, cmd: u64, data: u64) -> u64 {
    (dev << 56) | (cmd << 48) | (data & ((1 << 48) - 1))
}

/// The halt-device enable mask (halt is always available).
pub const fn ihalt_from_config() -> u64 {
    1 << CMD_HALT
}

/// The console-device enable mask for a configuration (putchar is always
/// available, getchar is opt-in).
pub fn iconsole_from_config(c: &HtifConfig) -> u64 {
    (1 << CMD_PUTCHAR) | (u64::from(c.console_getchar) << CMD_GETCHAR)
}

/// The yield-device enable mask for a configuration.
pub fn iyield_from_config(c: &HtifConfig) -> u64 {
    (u64::from(c.yield_manual) << CMD_YIELD_MANUAL)
        | (u64::from(c.yield_automatic) << CMD_YIELD_AUTOMATIC)
}

/// Recovers the `console_getchar` config flag from the live state.
pub fn config_console_getchar(state: &ProcessorState) -> bool {
    state.htif_iconsole >> CMD_GETCHAR & 1 != 0
}

/// Recovers the `yield_manual` config flag from the live state.
pub fn config_yield_manual(state: &ProcessorState) -> bool {
    state.htif_iyield >> CMD_YIELD_MANUAL & 1 != 0
}

/// Recovers the `yield_automatic` config flag from the live state.
pub fn config_yield_automatic(state: &ProcessorState) -> bool {
    state.htif_iyield >> CMD_YIELD_AUTOMATIC & 1 != 0
}

/// Serializes the HTIF register page into `out`.
pub(crate) fn peek_page(state: &ProcessorState, page_index: u64, out: &mut [u8]) -> bool {
    if page_index != 0 {
        return false;
    }
    out.fill(0);
    super::put_word(out, TOHOST_OFFSET, state.htif_tohost);
    super::put_word(out, FROMHOST_OFFSET, state.htif_fromhost);
    super::put_word(out, IHALT_OFFSET, state.htif_ihalt);
    super::put_word(out, ICONSOLE_OFFSET, state.htif_iconsole);
    super::put_word(out, IYIELD_OFFSET, state.htif_iyield);
    true
}

impl Machine {
    /// Guest read of an HTIF register.
    pub(crate) fn htif_read(&mut self, offset: u64) -> u64 {
        match offset {
            TOHOST_OFFSET => self.read_htif_tohost(),
            FROMHOST_OFFSET => self.read_htif_fromhost(),
            IHALT_OFFSET => self.read_htif_ihalt(),
            ICONSOLE_OFFSET => self.read_htif_iconsole(),
            IYIELD_OFFSET => self.read_htif_iyield(),
            _ => 0,
        }
    }

    /// Guest write of an HTIF register.
    pub(crate) fn htif_write(&mut self, offset: u64, val: u64) {
        match offset {
            TOHOST_OFFSET => self.htif_handle_tohost(val),
            FROMHOST_OFFSET => self.write_htif_fromhost(val),
            // The enable registers are configuration, read-only to the guest.
            _ => {}
        }
    }

    fn htif_handle_tohost(&mut self, val: u64) {
        self.write_htif_tohost(val);
        let dev = val >> 56;
        let cmd = (val >> 48) & 0xFF;
        let data = val & ((1 << 48) - 1);
        match dev {
            DEV_HALT => {
                if self.state.htif_ihalt >> cmd & 1 != 0 && data & 1 != 0 {
                    tracing::info!(tohost = val, "guest halted through HTIF");
                    self.set_iflags_h();
                }
            }
            DEV_CONSOLE => {
                if self.state.htif_iconsole >> cmd & 1 == 0 {
                    return;
                }
                if cmd == CMD_PUTCHAR {
                    self.console.push(data as u8);
                }
                // getchar has no buffered input in the core; both commands
                // acknowledge with an empty payload.
                self.write_htif_fromhost(pack(dev, cmd, 0));
            }
            DEV_YIELD => {
                if self.state.htif_iyield >> cmd & 1 != 0 {
                    tracing::info!(cmd, data, "guest yielded through HTIF");
                    self.set_iflags_y();
                    self.write_htif_fromhost(pack(dev, cmd, 0));
                }
            }
            _ => {}
        }
    }
}
