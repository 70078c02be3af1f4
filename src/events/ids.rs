//! AIE1 event identifiers.
//!
//! Each module numbers its events 0..=127 independently. Only the ranges the
//! event core acts on are named here: the error ranges, the group-error
//! events and the broadcast events.

use crate::device::ModuleType;

/// Number of event identifiers per module.
pub const NUM_EVENTS: usize = 128;

/// No event. Writing this to a broadcast slot disconnects it.
pub const NONE: u8 = 0;
/// Always-true pseudo event.
pub const TRUE: u8 = 1;

/// First broadcast event, identical in every module. `BROADCAST_0 + n` is
/// raised when broadcast channel `n` passes through the module.
pub const BROADCAST_0: u8 = 107;
pub const BROADCAST_15: u8 = BROADCAST_0 + 15;

/// Core module events.
pub mod core {
    pub const GROUP_ERRORS_0: u8 = 46;

    pub const SRS_SATURATE: u8 = 48;
    pub const UPS_SATURATE: u8 = 49;
    pub const FP_OVERFLOW: u8 = 50;
    pub const FP_UNDERFLOW: u8 = 51;
    pub const FP_INVALID: u8 = 52;
    pub const FP_DIV_BY_ZERO: u8 = 53;
    pub const TLAST_IN_WSS_WORDS_0_2: u8 = 54;
    pub const PM_REG_ACCESS_FAILURE: u8 = 55;
    pub const STREAM_PKT_PARITY_ERROR: u8 = 56;
    pub const CONTROL_PKT_ERROR: u8 = 57;
    pub const AXI_MM_SLAVE_ERROR: u8 = 58;
    pub const INSTRUCTION_DECOMPRESSION_ERROR: u8 = 59;
    pub const DM_ADDRESS_OUT_OF_RANGE: u8 = 60;
    pub const PM_ECC_ERROR_SCRUB_CORRECTED: u8 = 61;
    pub const PM_ECC_ERROR_SCRUB_2BIT: u8 = 62;
    pub const PM_ECC_ERROR_1BIT: u8 = 63;
    pub const PM_ECC_ERROR_2BIT: u8 = 64;
    pub const PM_ADDRESS_OUT_OF_RANGE: u8 = 65;
    pub const DM_ACCESS_TO_UNAVAILABLE: u8 = 66;
    pub const LOCK_ACCESS_TO_UNAVAILABLE: u8 = 67;
    pub const INSTR_WARNING: u8 = 68;
    pub const INSTR_ERROR: u8 = 69;
}

/// Memory module events.
pub mod mem {
    pub const GROUP_ERRORS: u8 = 86;

    pub const DM_ECC_ERROR_SCRUB_CORRECTED: u8 = 87;
    pub const DM_ECC_ERROR_SCRUB_2BIT: u8 = 88;
    pub const DM_ECC_ERROR_1BIT: u8 = 89;
    pub const DM_ECC_ERROR_2BIT: u8 = 90;
    pub const DM_PARITY_ERROR_BANK_2: u8 = 91;
    pub const DM_PARITY_ERROR_BANK_3: u8 = 92;
    pub const DM_PARITY_ERROR_BANK_4: u8 = 93;
    pub const DM_PARITY_ERROR_BANK_5: u8 = 94;
    pub const DM_PARITY_ERROR_BANK_6: u8 = 95;
    pub const DM_PARITY_ERROR_BANK_7: u8 = 96;
    pub const DMA_S2MM_0_ERROR: u8 = 97;
    pub const DMA_S2MM_1_ERROR: u8 = 98;
    pub const DMA_MM2S_0_ERROR: u8 = 99;
    pub const DMA_MM2S_1_ERROR: u8 = 100;
}

/// Shim PL module events.
pub mod pl {
    pub const GROUP_ERRORS: u8 = 61;

    pub const AXI_MM_SLAVE_TILE_ERROR: u8 = 62;
    pub const CONTROL_PKT_ERROR: u8 = 63;
    pub const AXI_MM_DECODE_NSU_ERROR_NOC: u8 = 64;
    pub const AXI_MM_SLAVE_NSU_ERROR_NOC: u8 = 65;
    pub const AXI_MM_UNSUPPORTED_TRAFFIC_NOC: u8 = 66;
    pub const AXI_MM_UNSECURE_ACCESS_IN_SECURE_MODE_NOC: u8 = 67;
    pub const AXI_MM_BYTE_STROBE_ERROR_NOC: u8 = 68;
    pub const DMA_S2MM_0_ERROR_NOC: u8 = 69;
    pub const DMA_S2MM_1_ERROR_NOC: u8 = 70;
    pub const DMA_MM2S_0_ERROR_NOC: u8 = 71;
    pub const DMA_MM2S_1_ERROR_NOC: u8 = 72;
}

const CORE_ERROR_NAMES: [&str; 22] = [
    "Core SRS Saturate",
    "Core UPS Saturate",
    "Core FP Overflow",
    "Core FP Underflow",
    "Core FP Invalid",
    "Core FP DIV by zero",
    "Core TLAST in WSS words 0-2",
    "Core PM Reg access failure",
    "Core Stream PKT parity error",
    "Core Control PKT error",
    "Core AXI MM slave error",
    "Core Instruction decompression error",
    "Core DM address out of range",
    "Core PM ECC error scrub corrected",
    "Core PM ECC error scrub 2bit",
    "Core PM ECC error 1bit",
    "Core PM ECC error 2bit",
    "Core PM address out of range",
    "Core DM access to unavailable",
    "Core LOCK access to unavailable",
    "Core INSTR warning",
    "Core INSTR error",
];

const MEM_ERROR_NAMES: [&str; 14] = [
    "DM ECC error scrub corrected",
    "DM ECC error scrub 2bit",
    "DM ECC error 1bit",
    "DM ECC error 2bit",
    "DM parity error bank 2",
    "DM parity error bank 3",
    "DM parity error bank 4",
    "DM parity error bank 5",
    "DM parity error bank 6",
    "DM parity error bank 7",
    "DM DMA S2MM 0 error",
    "DM DMA S2MM 1 error",
    "DM DMA MM2S 0 error",
    "DM DMA MM2S 1 error",
];

const PL_ERROR_NAMES: [&str; 11] = [
    "Shim AXI MM slave tile error",
    "Shim Control PKT error",
    "Shim AXI MM decode NSU error NOC",
    "Shim AXI MM slave NSU error NOC",
    "Shim AXI MM unsupported traffic NOC",
    "Shim AXI MM unsecure access in secure mode NOC",
    "Shim AXI MM Byte strobe error NOC",
    "Shim DMA S2MM 0 error NOC",
    "Shim DMA S2MM 1 error NOC",
    "Shim DMA MM2S 0 error NOC",
    "Shim DMA MM2S 1 error NOC",
];

/// Per-module event numbering facts used by the error path.
#[derive(Debug)]
pub struct ModuleEvents {
    pub module: ModuleType,
    pub error_start: u8,
    pub error_end: u8,
    /// Event raised when any enabled error of the group fires
    pub group_errors_event: u8,
    /// Group-enable register that selects the errors for that event
    pub group_errors_index: u8,
    pub error_names: &'static [&'static str],
}

static CORE_EVENTS: ModuleEvents = ModuleEvents {
    module: ModuleType::Core,
    error_start: core::SRS_SATURATE,
    error_end: core::INSTR_ERROR,
    group_errors_event: core::GROUP_ERRORS_0,
    group_errors_index: 4,
    error_names: &CORE_ERROR_NAMES,
};

static MEM_EVENTS: ModuleEvents = ModuleEvents {
    module: ModuleType::Memory,
    error_start: mem::DM_ECC_ERROR_SCRUB_CORRECTED,
    error_end: mem::DMA_MM2S_1_ERROR,
    group_errors_event: mem::GROUP_ERRORS,
    group_errors_index: 5,
    error_names: &MEM_ERROR_NAMES,
};

static PL_EVENTS: ModuleEvents = ModuleEvents {
    module: ModuleType::Pl,
    error_start: pl::AXI_MM_SLAVE_TILE_ERROR,
    error_end: pl::DMA_MM2S_1_ERROR_NOC,
    group_errors_event: pl::GROUP_ERRORS,
    group_errors_index: 3,
    error_names: &PL_ERROR_NAMES,
};

impl ModuleEvents {
    pub fn of(module: ModuleType) -> &'static ModuleEvents {
        match module {
            ModuleType::Core => &CORE_EVENTS,
            ModuleType::Memory => &MEM_EVENTS,
            ModuleType::Pl => &PL_EVENTS,
        }
    }

    #[inline]
    pub fn error_count(&self) -> u8 {
        self.error_end - self.error_start + 1
    }

    pub fn errors(&self) -> impl Iterator<Item = u8> {
        self.error_start..=self.error_end
    }

    #[inline]
    pub fn is_error(&self, event: u8) -> bool {
        (self.error_start..=self.error_end).contains(&event)
    }

    /// Offset of an error within the module's error range.
    pub fn error_offset(&self, event: u8) -> Option<u8> {
        self.is_error(event).then(|| event - self.error_start)
    }

    pub fn error_name(&self, event: u8) -> Option<&'static str> {
        self.error_offset(event).map(|off| self.error_names[off as usize])
    }

    /// One bit per error offset.
    #[inline]
    pub fn range_mask(&self) -> u32 {
        (1u32 << self.error_count()) - 1
    }
}

/// Status word holding the broadcast events, and their bits within it.
pub fn broadcast_status_bits() -> (u8, u32) {
    (BROADCAST_0 / 32, 0xFFFF << (BROADCAST_0 % 32))
}
