/// Shorten a hex identifier (inbox id, wallet address) for log output.
pub fn truncate_hex(hex_string: impl AsRef<str>) -> String {
    let hex_string = hex_string.as_ref();
    // If empty string, return it
    if hex_string.is_empty() {
        return String::new();
    }

    let hex_value = if let Some(hex_value) = hex_string.strip_prefix("0x") {
        hex_value
    } else {
        hex_string
    };

    // If the hex value is 8 or fewer chars, return original string
    if hex_value.len() <= 8 || !hex_value.is_char_boundary(4) {
        return hex_string.to_string();
    }
    let tail = hex_value.len() - 4;
    if !hex_value.is_char_boundary(tail) {
        return hex_string.to_string();
    }

    format!("0x{}...{}", &hex_value[..4], &hex_value[tail..])
}

pub trait ShortHex {
    fn short_hex(&self) -> String;
}

impl ShortHex for str {
    fn short_hex(&self) -> String {
        truncate_hex(self)
    }
}

impl ShortHex for String {
    fn short_hex(&self) -> String {
        truncate_hex(self)
    }
}
