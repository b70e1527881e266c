/// Value type of a motor parameter. Determines how many payload bytes carry the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Float32,
    Int16,
    Int8,
}

impl ParameterType {
    pub const fn width(self) -> usize {
        match self {
            ParameterType::Float32 => 4,
            ParameterType::Int16 => 2,
            ParameterType::Int8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub index: u16,
    pub ty: ParameterType,
}

impl ParameterSpec {
    pub const fn new(name: &'static str, index: u16, ty: ParameterType) -> Self {
        Self { name, index, ty }
    }

    pub const fn width(&self) -> usize {
        self.ty.width()
    }
}

pub const RUN_MODE: ParameterSpec = ParameterSpec::new("RUN_MODE", 0x0570, ParameterType::Int8);
pub const SPEED_MAX_CURRENT: ParameterSpec =
    ParameterSpec::new("SPEED_MAX_CURRENT", 0x1870, ParameterType::Float32);
pub const SPEED_TARGET: ParameterSpec =
    ParameterSpec::new("SPEED_TARGET", 0x0A70, ParameterType::Float32);
pub const POSITION_SPEED_LIMIT: ParameterSpec =
    ParameterSpec::new("POSITION_SPEED_LIMIT", 0x1770, ParameterType::Float32);
pub const POSITION_TARGET: ParameterSpec =
    ParameterSpec::new("POSITION_TARGET", 0x1670, ParameterType::Float32);
pub const MECH_POS: ParameterSpec = ParameterSpec::new("MECH_POS", 0x1970, ParameterType::Float32);
pub const MECH_VEL: ParameterSpec = ParameterSpec::new("MECH_VEL", 0x1B70, ParameterType::Float32);
pub const SPEED_ACCELERATION: ParameterSpec =
    ParameterSpec::new("SPEED_ACCELERATION", 0x2270, ParameterType::Float32);
pub const POSITION_03_SPEED: ParameterSpec =
    ParameterSpec::new("POSITION_03_SPEED", 0x2470, ParameterType::Float32);
pub const POSITION_ACCELERATION: ParameterSpec =
    ParameterSpec::new("POSITION_ACCELERATION", 0x2570, ParameterType::Float32);

pub const PARAMETERS: [ParameterSpec; 10] = [
    RUN_MODE,
    SPEED_MAX_CURRENT,
    SPEED_TARGET,
    POSITION_SPEED_LIMIT,
    POSITION_TARGET,
    MECH_POS,
    MECH_VEL,
    SPEED_ACCELERATION,
    POSITION_03_SPEED,
    POSITION_ACCELERATION,
];

pub const UNKNOWN_PARAMETER: &str = "UNKNOWN_PARAMETER";

/// Values written to `RUN_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunMode {
    Position = 1,
    Velocity = 2,
}

impl RunMode {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

pub fn lookup_by_name(name: &str) -> Option<ParameterSpec> {
    PARAMETERS.iter().copied().find(|spec| spec.name == name)
}

/// Returns `None` for indices outside the registry. Callers decoding a reply treat that as
/// an unknown parameter, not a fatal error.
pub fn lookup_by_index(index: u16) -> Option<ParameterSpec> {
    PARAMETERS.iter().copied().find(|spec| spec.index == index)
}

pub fn parameter_name(index: u16) -> &'static str {
    lookup_by_index(index).map_or(UNKNOWN_PARAMETER, |spec| spec.name)
}
