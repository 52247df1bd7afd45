//! This module provides functionality to load Portable Executable (PE) files, normally denoted with
//! a .exe file extension, enough to locate the resource section (`.rsrc`) and its data directory
//! entry, and to append a freshly-built resource section when committing changes back out.
use bitflags::bitflags;
use zerocopy::{
    BigEndian, FromBytes, Immutable, KnownLayout, LittleEndian, TryFromBytes, Unaligned, U16, U32,
    U64,
};

/// Index of the resource data directory within `IMAGE_OPTIONAL_HEADER::DataDirectory`.
pub const IMAGE_DIRECTORY_ENTRY_RESOURCE: usize = 2;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct Version {
    major: U16<LittleEndian>,
    minor: U16<LittleEndian>,
}

impl core::fmt::Display for Version {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct MZHeader {
    /// Magic, should be "MZ"/0x4D5A
    e_magic: U16<BigEndian>,
    /// "Count of Bytes on Last Page"
    e_cblp: U16<LittleEndian>,
    /// "Count of Pages", Number of 512-byte sections
    e_cp: U16<LittleEndian>,
    /// "Count of Relocations"
    e_crlc: U16<LittleEndian>,
    /// "Count of Paragraphs in Header"
    e_cparhdr: U16<LittleEndian>,
    /// Minimum extra paragraphs needed
    e_minalloc: U16<LittleEndian>,
    /// Maximum extra paragraphs needed
    e_maxalloc: U16<LittleEndian>,
    /// Initial Stack Segment value
    e_ss: U16<LittleEndian>,
    /// Initial Stack Pointer value
    e_sp: U16<LittleEndian>,
    /// Checksum value
    e_csum: U16<LittleEndian>,
    /// Initial Instruction Pointer value
    e_ip: U16<LittleEndian>,
    /// Initial Code Segment value
    e_cs: U16<LittleEndian>,
    /// "Logical File Address of Relocation Table"
    e_lfarlc: U16<LittleEndian>,
    /// Overlay Number
    e_ovno: U16<LittleEndian>,
    /// Reserved Words 1
    e_res: [U16<LittleEndian>; 4],
    /// OEM identifier
    e_oemid: U16<LittleEndian>,
    /// OEM information (specific to `e_oemid`)
    e_oeminfo: U16<LittleEndian>,
    /// Reserved Words 2
    e_res2: [U16<LittleEndian>; 10],
    /// "Logical File Address of New EXE Header"
    e_lfanew: U32<LittleEndian>,
}

impl MZHeader {
    fn load(input: &[u8], offset: usize) -> Option<&Self> {
        if input.len().checked_sub(offset)? < core::mem::size_of::<Self>() {
            return None;
        }

        let header = Self::ref_from_bytes(&input[offset..]).unwrap();
        match header.e_magic.get() {
            0x4D5A => Some(header),
            _ => None,
        }
    }
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct PEHeader {
    /// Magic, should be "PE\0\0"/0x50450000
    magic: U32<BigEndian>,
    /// Common Object File Format header
    object: COFFHeader,
}

impl PEHeader {
    fn load(input: &[u8], offset: usize) -> Option<&Self> {
        if input.len().checked_sub(offset)? < core::mem::size_of::<Self>() {
            return None;
        }

        let header = Self::ref_from_bytes(&input[offset..]).unwrap();
        match header.magic.get() {
            0x5045_0000 => Some(header),
            _ => None,
        }
    }
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct COFFHeader {
    machine: U16<LittleEndian>,
    section_count: U16<LittleEndian>,
    timestamp: U32<LittleEndian>,
    symbol_offset: U32<LittleEndian>,
    symbol_count: U32<LittleEndian>,
    optional_size: U16<LittleEndian>,
    attributes: U16<LittleEndian>,
}

#[derive(TryFromBytes, KnownLayout, Immutable)]
#[allow(dead_code, clippy::upper_case_acronyms)]
#[repr(u16)]
enum MachineType {
    /// The content of this field is assumed to be applicable to any machine type
    UNKNOWN = 0x0,
    /// Alpha AXP, 32-bit address space
    ALPHA = 0x184,
    /// Alpha AXP 64, 64-bit address space
    ALPHA64 = 0x284,
    /// Matsushita AM33
    AM33 = 0x1D3,
    /// x64
    AMD64 = 0x8664,
    /// ARM little endian
    ARM = 0x1C0,
    /// ARM64 little endian
    ARM64 = 0xAA64,
    /// ARM Thumb-2 little endian
    ARMNT = 0x1C4,
    /// EFI byte code
    EBC = 0xEBC,
    /// Intel 386 or later processors and compatible processors
    I386 = 0x14C,
    /// Intel Itanium processor family
    IA64 = 0x200,
    /// LoongArch 32-bit processor family
    LOONGARCH32 = 0x6232,
    /// LoongArch 64-bit processor family
    LOONGARCH64 = 0x6264,
    /// Mitsubishi M32R little endian
    M32R = 0x9041,
    /// MIPS16
    MIPS16 = 0x266,
    /// MIPS with FPU
    MIPSFPU = 0x366,
    /// MIPS16 with FPU
    MIPSFPU16 = 0x466,
    /// Power PC little endian
    POWERPC = 0x1F0,
    /// Power PC with floating point support
    POWERPCFP = 0x1F1,
    /// MIPS little endian
    R4000 = 0x166,
    /// RISC-V 32-bit address space
    RISCV32 = 0x5032,
    /// RISC-V 64-bit address space
    RISCV64 = 0x5064,
    /// RISC-V 128-bit address space
    RISCV128 = 0x5128,
    /// Hitachi SH3
    SH3 = 0x1A2,
    /// Hitachi SH3 DSP
    SH3DSP = 0x1A3,
    /// Hitachi SH4
    SH4 = 0x1A6,
    /// Hitachi SH5
    SH5 = 0x1A8,
    /// Thumb
    THUMB = 0x1C2,
    /// MIPS little-endian WCE v2
    WCEMIPSV2 = 0x169,
}

#[derive(FromBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct Attributes(u16);

bitflags! {
    impl Attributes: u16 {
        /// Image only, Windows CE, and Microsoft Windows NT and later. This indicates that the file does not contain base relocations and must therefore be loaded at its preferred base address. If the base address is not available, the loader reports an error. The default behavior of the linker is to strip base relocations from executable (EXE) files.
        const RelocsStripped = 1 << 0;
        /// Image only. This indicates that the image file is valid and can be run. If this flag is not set, it indicates a linker error.
        const ExecutableImage = 1 << 1;
        /// COFF line numbers have been removed. This flag is deprecated and should be zero.
        const LineNumsStripped = 1 << 2;
        /// COFF symbol table entries for local symbols have been removed. This flag is deprecated and should be zero.
        const LocalSymsStripped = 1 << 3;
        /// Obsolete. Aggressively trim working set. This flag is deprecated for Windows 2000 and later and must be zero.
        const AggressiveWsTrim = 1 << 4;
        /// Application can handle > 2-GB addresses.
        const LargeAddressAware = 1 << 5;
        /// This flag is reserved for future use.
        const Reserved = 1 << 6;
        /// Little endian: the least significant bit (LSB) precedes the most significant bit (MSB) in memory. This flag is deprecated and should be zero.
        const BytesReversedLo = 1 << 7;
        /// Machine is based on a 32-bit-word architecture.
        const Machine32Bit = 1 << 8;
        /// Debugging information is removed from the image file.
        const DebugStripped = 1 << 9;
        /// If the image is on removable media, fully load it and copy it to the swap file.
        const RemovableRunFromSwap = 1 << 10;
        /// If the image is on network media, fully load it and copy it to the swap file.
        const NetRunFromSwap = 1 << 11;
        /// The image file is a system file, not a user program.
        const System = 1 << 12;
        /// The image file is a dynamic-link library (DLL). Such files are considered executable files for almost all purposes, although they cannot be directly run.
        const Dll = 1 << 13;
        /// The file should be run only on a uniprocessor machine.
        const UpSystemOnly = 1 << 14;
        /// Big endian: the MSB precedes the LSB in memory. This flag is deprecated and should be zero.
        const BytesReversedHi = 1 << 15;
    }
}

#[allow(dead_code)]
impl COFFHeader {
    fn load(input: &[u8], offset: usize) -> Option<&Self> {
        if input.len().checked_sub(offset)? < core::mem::size_of::<Self>() {
            return None;
        }

        Some(Self::ref_from_bytes(&input[offset..]).unwrap())
    }

    fn machine_type(&self) -> Option<MachineType> {
        zerocopy::try_transmute!(self.machine.get()).ok()
    }

    fn attributes(&self) -> Attributes {
        zerocopy::transmute!(self.attributes.get())
    }
}

/// A single `IMAGE_DATA_DIRECTORY` entry: an RVA/size pair describing a well-known table (imports,
/// exports, resources, relocations, ...).
#[derive(Clone, Copy, Debug, Default, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DataDirectory {
    pub virtual_address: U32<LittleEndian>,
    pub size: U32<LittleEndian>,
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct OptionalHeader32 {
    magic: U16<LittleEndian>,
    linker_version: [u8; 2],
    size_of_code: U32<LittleEndian>,
    size_of_initialized_data: U32<LittleEndian>,
    size_of_uninitialized_data: U32<LittleEndian>,
    entry_point_addr: U32<LittleEndian>,
    base_of_code: U32<LittleEndian>,
    base_of_data: U32<LittleEndian>,
    image_base: U32<LittleEndian>,
    section_alignment: U32<LittleEndian>,
    file_alignment: U32<LittleEndian>,
    os_version: Version,
    image_version: Version,
    subsystem_version: Version,
    win32_version: Version,
    image_size: U32<LittleEndian>,
    header_size: U32<LittleEndian>,
    checksum: U32<LittleEndian>,
    subsystem: U16<LittleEndian>,
    dll_characteristics: U16<LittleEndian>,
    stack_reserve: U32<LittleEndian>,
    stack_commit: U32<LittleEndian>,
    heap_reserve: U32<LittleEndian>,
    heap_commit: U32<LittleEndian>,
    loader_flags: U32<LittleEndian>,
    number_of_rva_and_sizes: U32<LittleEndian>,
}

impl OptionalHeader32 {
    fn load(input: &[u8], offset: usize) -> Option<&Self> {
        if input.len().checked_sub(offset)? < core::mem::size_of::<Self>() {
            return None;
        }

        Some(Self::ref_from_bytes(&input[offset..]).unwrap())
    }

    fn number_of_rva_and_sizes(&self) -> u32 {
        self.number_of_rva_and_sizes.get()
    }
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct OptionalHeader64 {
    magic: U16<LittleEndian>,
    linker_version: [u8; 2],
    size_of_code: U32<LittleEndian>,
    size_of_initialized_data: U32<LittleEndian>,
    size_of_uninitialized_data: U32<LittleEndian>,
    entry_point_addr: U32<LittleEndian>,
    base_of_code: U32<LittleEndian>,
    image_base: U64<LittleEndian>,
    section_alignment: U32<LittleEndian>,
    file_alignment: U32<LittleEndian>,
    os_version: Version,
    image_version: Version,
    subsystem_version: Version,
    win32_version: Version,
    image_size: U32<LittleEndian>,
    header_size: U32<LittleEndian>,
    checksum: U32<LittleEndian>,
    subsystem: U16<LittleEndian>,
    dll_characteristics: U16<LittleEndian>,
    stack_reserve: U64<LittleEndian>,
    stack_commit: U64<LittleEndian>,
    heap_reserve: U64<LittleEndian>,
    heap_commit: U64<LittleEndian>,
    loader_flags: U32<LittleEndian>,
    number_of_rva_and_sizes: U32<LittleEndian>,
}

impl OptionalHeader64 {
    fn load(input: &[u8], offset: usize) -> Option<&Self> {
        if input.len().checked_sub(offset)? < core::mem::size_of::<Self>() {
            return None;
        }

        Some(Self::ref_from_bytes(&input[offset..]).unwrap())
    }

    fn number_of_rva_and_sizes(&self) -> u32 {
        self.number_of_rva_and_sizes.get()
    }
}

#[allow(dead_code)]
enum OptionalHeader<'a> {
    Header32(&'a OptionalHeader32),
    Header64(&'a OptionalHeader64),
}

impl OptionalHeader<'_> {
    fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            Self::Header32(header) => header.number_of_rva_and_sizes(),
            Self::Header64(header) => header.number_of_rva_and_sizes(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Header32(_) => core::mem::size_of::<OptionalHeader32>(),
            Self::Header64(_) => core::mem::size_of::<OptionalHeader64>(),
        }
    }
}

/// `IMAGE_SECTION_HEADER`, describing one section's placement both in the file and once mapped into
/// memory.
#[derive(Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: U32<LittleEndian>,
    pub virtual_address: U32<LittleEndian>,
    pub size_of_raw_data: U32<LittleEndian>,
    pub pointer_to_raw_data: U32<LittleEndian>,
    pub pointer_to_relocations: U32<LittleEndian>,
    pub pointer_to_linenumbers: U32<LittleEndian>,
    pub number_of_relocations: U16<LittleEndian>,
    pub number_of_linenumbers: U16<LittleEndian>,
    pub characteristics: U32<LittleEndian>,
}

impl SectionHeader {
    /// Section name with trailing NULs trimmed. Long names (`/123` COFF string-table offsets)
    /// are returned as-is; rcedit never needs to resolve them.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Does `rva` fall within this section once mapped?
    fn contains_rva(&self, rva: u32) -> bool {
        let start = self.virtual_address.get();
        let size = self.virtual_size.get().max(self.size_of_raw_data.get());
        rva >= start && rva < start.saturating_add(size)
    }
}

/// Minimal PE/COFF reader: locates section headers and the resource data directory so the resource
/// directory tree can be parsed out of, or appended back onto, the file.
#[allow(dead_code)]
pub struct PortableExecutable<'a> {
    input: &'a [u8],
    mz_header: &'a MZHeader,
    pe_header: &'a PEHeader,
    optional_header: Option<OptionalHeader<'a>>,
    data_directories: Vec<DataDirectory>,
    sections: Vec<SectionHeader>,
    /// File offset immediately after the section header table; new sections are appended here.
    pub section_table_end: usize,
}

impl<'a> PortableExecutable<'a> {
    #[must_use]
    pub fn new(input: &'a [u8]) -> Option<Self> {
        let mut offset = 0;

        let mz_header = MZHeader::load(input, offset)?;
        offset = mz_header.e_lfanew.get() as usize;

        let pe_header = PEHeader::load(input, offset)?;
        let pe_header_offset = offset;
        offset += core::mem::size_of::<PEHeader>();

        let optional_header = match pe_header.object.optional_size.get() > 0 {
            true => match u16::from_le_bytes([*input.get(offset)?, *input.get(offset + 1)?]) {
                0x10B => Some(OptionalHeader::Header32(OptionalHeader32::load(input, offset)?)),
                0x20B => Some(OptionalHeader::Header64(OptionalHeader64::load(input, offset)?)),
                _ => return None,
            },
            false => None,
        };

        let mut data_directories = Vec::new();
        if let Some(optional_header) = &optional_header {
            let directories_offset = offset + optional_header.size();
            let count = optional_header.number_of_rva_and_sizes().min(16) as usize;
            let entry_size = core::mem::size_of::<DataDirectory>();
            for index in 0..count {
                let entry_offset = directories_offset + index * entry_size;
                let entry = DataDirectory::ref_from_bytes(
                    input.get(entry_offset..entry_offset + entry_size)?,
                )
                .ok()?;
                data_directories.push(*entry);
            }
        }

        let section_table_offset =
            pe_header_offset + core::mem::size_of::<PEHeader>() + pe_header.object.optional_size.get() as usize;
        let section_count = pe_header.object.section_count.get() as usize;
        let mut sections = Vec::with_capacity(section_count);
        let entry_size = core::mem::size_of::<SectionHeader>();
        for index in 0..section_count {
            let entry_offset = section_table_offset + index * entry_size;
            let entry =
                SectionHeader::ref_from_bytes(input.get(entry_offset..entry_offset + entry_size)?)
                    .ok()?;
            sections.push(*entry);
        }
        let section_table_end = section_table_offset + section_count * entry_size;

        Some(Self {
            input,
            mz_header,
            pe_header,
            optional_header,
            data_directories,
            sections,
            section_table_end,
        })
    }

    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// RVA/size of the resource directory, if the file declares one.
    pub fn resource_directory(&self) -> Option<DataDirectory> {
        self.data_directories.get(IMAGE_DIRECTORY_ENTRY_RESOURCE).copied()
    }

    /// Converts an RVA to a file offset by locating the section that maps it.
    pub fn rva_to_file_offset(&self, rva: u32) -> Option<usize> {
        let section = self.sections.iter().find(|section| section.contains_rva(rva))?;
        let delta = rva - section.virtual_address.get();
        Some(section.pointer_to_raw_data.get() as usize + delta as usize)
    }

    /// Raw bytes of the `.rsrc` section, if present, sliced directly out of the source file.
    pub fn resource_section_data(&self) -> Option<&'a [u8]> {
        let directory = self.resource_directory()?;
        if directory.size.get() == 0 {
            return None;
        }
        let start = self.rva_to_file_offset(directory.virtual_address.get())?;
        let end = start + directory.size.get() as usize;
        self.input.get(start..end)
    }
}
