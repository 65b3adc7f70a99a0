// Frame markers
pub const PREAMBLE: u8 = 0x00;
pub const START_CODE_1: u8 = 0x00;
pub const START_CODE_2: u8 = 0xFF;
pub const POSTAMBLE: u8 = 0x00;

/// Frame start sequence (preamble + start codes).
pub const FRAME_START: [u8; 3] = [PREAMBLE, START_CODE_1, START_CODE_2];

/// ACK frame sent by the PN532 before every response.
pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
/// NACK frame (host should resend).
pub const NACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];

// Direction (TFI) bytes
pub const HOST_TO_PN532: u8 = 0xD4;
pub const PN532_TO_HOST: u8 = 0xD5;

// Commands
pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
pub const CMD_SAM_CONFIGURATION: u8 = 0x14;
pub const CMD_RF_CONFIGURATION: u8 = 0x32;
pub const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
pub const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

// SAMConfiguration parameters
pub const SAM_MODE_NORMAL: u8 = 0x01;
/// Virtual card timeout in 50ms units (0x14 * 50ms = 1s).
pub const SAM_TIMEOUT_1S: u8 = 0x14;
pub const SAM_USE_IRQ: u8 = 0x01;

// RFConfiguration items
pub const RF_CFG_MAX_RETRIES: u8 = 0x05;
/// MxRtyATR, MxRtyPSL, MxRtyPassiveActivation.
pub const RF_MAX_RETRIES_POLLING: [u8; 3] = [0xFF, 0x01, 0x02];

/// InListPassiveTarget baud rate / modulation: 106 kbps ISO14443 Type A.
pub const BRTY_106K_TYPE_A: u8 = 0x00;
/// The PN532 never reports more than two simultaneous targets.
pub const MAX_TARGETS: u8 = 2;

// MIFARE / NTAG commands carried in InDataExchange
pub const MIFARE_CMD_READ: u8 = 0x30;
pub const MIFARE_CMD_WRITE: u8 = 0xA0;

/// Data returned by a single READ, and accepted by a compatibility WRITE.
pub const BLOCK_SIZE: usize = 16;
/// First block of NTAG21x user memory.
pub const USER_DATA_BLOCK: u8 = 4;

/// SEL_RES bit advertising ISO14443-4 (ATS follows the UID in target data).
pub const SEL_RES_ISO_DEP: u8 = 0x20;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Substrings identifying common USB-to-serial bridge chips.
pub const BRIDGE_CHIPS: &[&str] = &["CH340", "CH341", "FT232", "CP210", "PL2303"];

/// USB vendor IDs of the same bridge families (QinHeng, FTDI, Silicon Labs, Prolific).
pub const BRIDGE_VENDOR_IDS: &[u16] = &[0x1A86, 0x0403, 0x10C4, 0x067B];
