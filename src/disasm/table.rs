//! Decoder over a pre-decoded op stream.
//!
//! Hosts that decode elsewhere (or tests) hand the engine a table of op
//! descriptors keyed by address. Decoding looks the address up and checks
//! that the readable bytes cover the op.

use std::collections::BTreeMap;

use crate::core::disassembler::{
    ArchInfo, Architecture, Decoder, DecoderPlugin, DisassemblerError, DisassemblerResult,
};
use crate::core::op::Op;

#[derive(Debug, Clone)]
pub struct TableDecoder {
    ops: BTreeMap<u64, Op>,
    architecture: Architecture,
    info: ArchInfo,
    /// Section name fragments whose indirect jumps keep a function going
    continue_sections: Vec<String>,
}

impl TableDecoder {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            ops: BTreeMap::new(),
            architecture,
            info: ArchInfo::default(),
            continue_sections: Vec::new(),
        }
    }

    pub fn insert(&mut self, op: Op) -> &mut Self {
        self.ops.insert(op.address, op);
        self
    }

    pub fn with_arch_info(mut self, info: ArchInfo) -> Self {
        self.info = info;
        self
    }

    /// Let indirect jumps in sections whose name contains `fragment` continue.
    pub fn with_continue_section(mut self, fragment: impl Into<String>) -> Self {
        self.continue_sections.push(fragment.into());
        self
    }

    pub fn get(&self, addr: u64) -> Option<&Op> {
        self.ops.get(&addr)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl FromIterator<Op> for TableDecoder {
    fn from_iter<T: IntoIterator<Item = Op>>(iter: T) -> Self {
        let mut table = TableDecoder::new(Architecture::Unknown);
        for op in iter {
            table.insert(op);
        }
        table
    }
}

impl Decoder for TableDecoder {
    fn decode(&self, addr: u64, bytes: &[u8]) -> DisassemblerResult<Op> {
        let op = self
            .ops
            .get(&addr)
            .ok_or(DisassemblerError::UnknownAddress(addr))?;
        if bytes.len() < op.size {
            return Err(DisassemblerError::InsufficientBytes());
        }
        Ok(op.clone())
    }

    fn arch_info(&self) -> ArchInfo {
        self.info
    }

    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn ujmp_continues(&self, _addr: u64, section: Option<&str>) -> bool {
        section.is_some_and(|s| self.continue_sections.iter().any(|f| s.contains(f.as_str())))
    }

    fn name(&self) -> &str {
        "table"
    }
}

/// Plugin handing out copies of one op table.
#[derive(Debug, Clone)]
pub struct TablePlugin {
    name: String,
    bits: Vec<u8>,
    table: TableDecoder,
}

impl TablePlugin {
    /// Register `table` under `name`, usable at the listed bit widths.
    pub fn new(name: impl Into<String>, bits: &[u8], table: TableDecoder) -> Self {
        Self {
            name: name.into(),
            bits: bits.to_vec(),
            table,
        }
    }
}

impl DecoderPlugin for TablePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_bits(&self, bits: u8) -> bool {
        self.bits.contains(&bits)
    }

    fn instantiate(&self, bits: u8, _big_endian: bool) -> DisassemblerResult<Box<dyn Decoder>> {
        if !self.supports_bits(bits) {
            return Err(DisassemblerError::UnsupportedBits(bits));
        }
        Ok(Box::new(self.table.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::op::OpKind;

    #[test]
    fn lookup_and_length_check() {
        let table: TableDecoder = [Op::new(0x10, 4, OpKind::Mov), Op::new(0x14, 1, OpKind::Ret)]
            .into_iter()
            .collect();
        assert_eq!(table.len(), 2);
        assert_eq!(table.decode(0x10, &[0; 8]).unwrap().size, 4);
        assert_eq!(
            table.decode(0x10, &[0; 2]),
            Err(DisassemblerError::InsufficientBytes())
        );
        assert_eq!(
            table.decode(0x11, &[0; 8]),
            Err(DisassemblerError::UnknownAddress(0x11))
        );
    }

    #[test]
    fn plugin_checks_bits() {
        let plugin = TablePlugin::new("toy", &[32], TableDecoder::new(Architecture::Unknown));
        assert!(plugin.instantiate(32, false).is_ok());
        assert!(matches!(
            plugin.instantiate(64, false),
            Err(DisassemblerError::UnsupportedBits(64))
        ));
    }

    #[test]
    fn continue_sections() {
        let table = TableDecoder::new(Architecture::X86).with_continue_section(".plt");
        assert!(table.ujmp_continues(0, Some(".plt.got")));
        assert!(!table.ujmp_continues(0, Some(".text")));
        assert!(!table.ujmp_continues(0, None));
    }
}
