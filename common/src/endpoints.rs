pub const THINGSPEAK_UPDATE_URL: &str = "https://api.thingspeak.com/update";
pub const FIRMWARE_SOURCE_URL: &str =
    "https://raw.githubusercontent.com/rnrtl33-lgtm/esp32_sollarstill/main/firmware.bin";

/// ThingSpeak drops updates for a channel that arrive closer together than this.
pub const MIN_UPLOAD_SPACING_MS: u64 = 15_000;
