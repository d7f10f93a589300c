//! Shared settings.
//!
//! A hierarchical option surface with typed leaves. Settings are declared in a static
//! descriptor table; names are dotted paths, values are set from strings (including the
//! `name=value` form command lines pass around), and every setting is introspective: it
//! advertises its type, description, current value, and the permitted values of enums.
//!
//! A [`Builder`] is mutable; [`Flags`] freeze it into the immutable view passed to passes.

use core::fmt;

/// The type of a setting's value.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SettingKind {
    /// A yes/no flag.
    Bool,
    /// One bit of a feature word.
    Bit,
    /// A signed integer.
    Int,
    /// A floating point number.
    Double,
    /// A free-form string.
    Str,
    /// One of a fixed list of identifiers.
    Enum,
}

/// A typed setting value.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    /// A boolean or bit value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A double value.
    Double(f64),
    /// A string value.
    Str(String),
    /// An index into the enum's permitted values.
    Enum(u8),
}

/// The static description of one setting.
pub struct Descriptor {
    /// Dotted-path name of the setting.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// The value type.
    pub kind: SettingKind,
    /// The default value.
    pub default: Value,
    /// The permitted identifiers of an enum setting.
    pub values: &'static [&'static str],
}

/// All settings of this library.
static DESCRIPTORS: [Descriptor; 6] = [
    Descriptor {
        name: "verifier.enable",
        description: "Run the verifier after every pass",
        kind: SettingKind::Bool,
        default: Value::Bool(true),
        values: &[],
    },
    Descriptor {
        name: "timing.enable",
        description: "Collect per-pass timings",
        kind: SettingKind::Bool,
        default: Value::Bool(false),
        values: &[],
    },
    Descriptor {
        name: "opt.level",
        description: "Middle-end optimization effort",
        kind: SettingKind::Enum,
        default: Value::Enum(1),
        values: &["none", "local", "full"],
    },
    Descriptor {
        name: "unroll.max_factor",
        description: "Largest loop unrolling factor",
        kind: SettingKind::Int,
        default: Value::Int(4),
        values: &[],
    },
    Descriptor {
        name: "unroll.max_growth",
        description: "Permitted code growth per unrolled loop",
        kind: SettingKind::Double,
        default: Value::Double(4.0),
        values: &[],
    },
    Descriptor {
        name: "be.unit_name",
        description: "Name of the compilation unit in emitted assembly",
        kind: SettingKind::Str,
        default: Value::Str(String::new()),
        values: &[],
    },
];

/// An error produced when changing a setting.
#[derive(Debug, PartialEq, Eq)]
pub enum SetError {
    /// No setting by this name exists.
    BadName(String),
    /// The value is malformed for the setting's type.
    BadValue(String),
}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadName(name) => write!(f, "No existing setting named '{}'", name),
            Self::BadValue(value) => write!(f, "Invalid setting value '{}'", value),
        }
    }
}

impl std::error::Error for SetError {}

/// A result returned when changing a setting.
pub type SetResult<T> = Result<T, SetError>;

/// Collects settings values based on a template.
#[derive(Clone)]
pub struct Builder {
    values: Vec<Value>,
}

/// Create a new builder with all settings at their defaults.
pub fn builder() -> Builder {
    Builder {
        values: DESCRIPTORS.iter().map(|d| d.default.clone()).collect(),
    }
}

/// Functions for configuring a builder.
pub trait Configurable {
    /// Set the setting `name` from a string value.
    fn set(&mut self, name: &str, value: &str) -> SetResult<()>;

    /// Set the boolean setting `name` to true.
    fn enable(&mut self, name: &str) -> SetResult<()>;
}

fn descriptor_index(name: &str) -> SetResult<usize> {
    DESCRIPTORS
        .iter()
        .position(|d| d.name == name)
        .ok_or_else(|| SetError::BadName(name.to_string()))
}

fn parse_value(descr: &Descriptor, value: &str) -> SetResult<Value> {
    let bad = || SetError::BadValue(value.to_string());
    match descr.kind {
        SettingKind::Bool | SettingKind::Bit => match value {
            "true" | "on" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "off" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(bad()),
        },
        SettingKind::Int => value.parse().map(Value::Int).map_err(|_| bad()),
        SettingKind::Double => value.parse().map(Value::Double).map_err(|_| bad()),
        SettingKind::Str => Ok(Value::Str(value.to_string())),
        SettingKind::Enum => descr
            .values
            .iter()
            .position(|&v| v == value)
            .map(|i| Value::Enum(i as u8))
            .ok_or_else(bad),
    }
}

impl Builder {
    /// Apply a `name=value` string; a bare name enables a boolean.
    pub fn set_from_string(&mut self, spec: &str) -> SetResult<()> {
        match spec.split_once('=') {
            Some((name, value)) => self.set(name.trim(), value.trim()),
            None => self.enable(spec.trim()),
        }
    }

    /// Iterate over all settings with their current values.
    pub fn iter(&self) -> impl Iterator<Item = Setting<'_>> {
        DESCRIPTORS.iter().enumerate().map(|(i, d)| Setting {
            descriptor: d,
            value: &self.values[i],
        })
    }
}

impl Configurable for Builder {
    fn set(&mut self, name: &str, value: &str) -> SetResult<()> {
        let idx = descriptor_index(name)?;
        self.values[idx] = parse_value(&DESCRIPTORS[idx], value)?;
        Ok(())
    }

    fn enable(&mut self, name: &str) -> SetResult<()> {
        let idx = descriptor_index(name)?;
        match DESCRIPTORS[idx].kind {
            SettingKind::Bool | SettingKind::Bit => {
                self.values[idx] = Value::Bool(true);
                Ok(())
            }
            _ => Err(SetError::BadValue("true".to_string())),
        }
    }
}

/// One setting together with its current value, for introspection.
pub struct Setting<'a> {
    descriptor: &'static Descriptor,
    value: &'a Value,
}

impl Setting<'_> {
    /// The setting's dotted-path name.
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// The setting's description.
    pub fn description(&self) -> &'static str {
        self.descriptor.description
    }

    /// The setting's type.
    pub fn kind(&self) -> SettingKind {
        self.descriptor.kind
    }

    /// The permitted identifiers of an enum setting.
    pub fn values(&self) -> &'static [&'static str] {
        self.descriptor.values
    }

    /// The current value, rendered as a string.
    pub fn current(&self) -> String {
        match self.value {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Str(s) => s.clone(),
            Value::Enum(i) => self.descriptor.values[usize::from(*i)].to_string(),
        }
    }
}

/// Flags represent the final, immutable settings values.
#[derive(Clone)]
pub struct Flags {
    values: Vec<Value>,
}

impl Flags {
    /// Freeze a builder into flags.
    pub fn new(builder: Builder) -> Self {
        Self {
            values: builder.values,
        }
    }

    fn get(&self, name: &str) -> &Value {
        let idx = descriptor_index(name).expect("flag name is statically known");
        &self.values[idx]
    }

    /// Run the verifier after every pass?
    pub fn enable_verifier(&self) -> bool {
        matches!(self.get("verifier.enable"), Value::Bool(true))
    }

    /// Collect per-pass timings?
    pub fn enable_timing(&self) -> bool {
        matches!(self.get("timing.enable"), Value::Bool(true))
    }

    /// The middle-end optimization effort: "none", "local", or "full".
    pub fn opt_level(&self) -> &'static str {
        match self.get("opt.level") {
            Value::Enum(i) => DESCRIPTORS[2].values[usize::from(*i)],
            _ => unreachable!(),
        }
    }

    /// The largest loop unrolling factor.
    pub fn unroll_max_factor(&self) -> u32 {
        match self.get("unroll.max_factor") {
            Value::Int(i) => (*i).max(0) as u32,
            _ => unreachable!(),
        }
    }

    /// Permitted code growth per unrolled loop.
    pub fn unroll_max_growth(&self) -> f64 {
        match self.get("unroll.max_growth") {
            Value::Double(d) => *d,
            _ => unreachable!(),
        }
    }

    /// The compilation unit name for emitted assembly.
    pub fn unit_name(&self) -> &str {
        match self.get("be.unit_name") {
            Value::Str(s) => s,
            _ => unreachable!(),
        }
    }

    /// Iterate over all settings with their current values.
    pub fn iter(&self) -> impl Iterator<Item = Setting<'_>> {
        DESCRIPTORS.iter().enumerate().map(|(i, d)| Setting {
            descriptor: d,
            value: &self.values[i],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let flags = Flags::new(builder());
        assert!(flags.enable_verifier());
        assert!(!flags.enable_timing());
        assert_eq!(flags.opt_level(), "local");
        assert_eq!(flags.unroll_max_factor(), 4);
    }

    #[test]
    fn set_by_dotted_path() {
        let mut b = builder();
        b.set("unroll.max_factor", "8").unwrap();
        b.set("opt.level", "full").unwrap();
        b.set_from_string("timing.enable=yes").unwrap();
        b.set_from_string("verifier.enable").unwrap();
        let flags = Flags::new(b);
        assert_eq!(flags.unroll_max_factor(), 8);
        assert_eq!(flags.opt_level(), "full");
        assert!(flags.enable_timing());
    }

    #[test]
    fn rejects_unknown_names_and_bad_values() {
        let mut b = builder();
        assert_eq!(
            b.set("no.such.setting", "1"),
            Err(SetError::BadName("no.such.setting".to_string()))
        );
        assert_eq!(
            b.set("unroll.max_factor", "many"),
            Err(SetError::BadValue("many".to_string()))
        );
        assert_eq!(
            b.set("opt.level", "ludicrous"),
            Err(SetError::BadValue("ludicrous".to_string()))
        );
    }

    #[test]
    fn introspection() {
        let b = builder();
        let opt = b.iter().find(|s| s.name() == "opt.level").unwrap();
        assert_eq!(opt.kind(), SettingKind::Enum);
        assert_eq!(opt.values(), &["none", "local", "full"]);
        assert_eq!(opt.current(), "local");
        assert!(!opt.description().is_empty());
    }
}
