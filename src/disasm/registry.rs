use crate::core::disassembler::{Decoder, DecoderPlugin, DisassemblerError, DisassemblerResult};

use super::iced::IcedDecoder;

/// Built-in x86 family plugin (iced-x86).
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Plugin;

impl DecoderPlugin for X86Plugin {
    fn name(&self) -> &str {
        "x86"
    }

    fn supports_bits(&self, bits: u8) -> bool {
        matches!(bits, 16 | 32 | 64)
    }

    fn instantiate(&self, bits: u8, big_endian: bool) -> DisassemblerResult<Box<dyn Decoder>> {
        if big_endian {
            return Err(DisassemblerError::InternalError(
                "x86 has no big-endian mode".to_string(),
            ));
        }
        Ok(Box::new(IcedDecoder::new(bits)?))
    }
}

/// Plugins available without host registration.
pub fn builtin_plugins() -> Vec<Box<dyn DecoderPlugin>> {
    vec![Box::new(X86Plugin)]
}

/// Select the plugin registered under `name`.
pub fn find_plugin<'p>(
    plugins: &'p [Box<dyn DecoderPlugin>],
    name: &str,
) -> Option<&'p dyn DecoderPlugin> {
    plugins
        .iter()
        .rev()
        .find(|p| p.name() == name)
        .map(|p| &**p)
}
