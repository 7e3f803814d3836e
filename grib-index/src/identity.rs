use std::io::{self, Read, Write};

use crate::extio::{ExtendedRead, ExtendedWrite};
use crate::helpers::content_hash;

/// Everything that distinguishes one parameter from another within a group.
///
/// Two variables from different partitions are the "same" variable when their identities hash
/// to the same `cdm_hash`.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParamIdentity {
    pub table_version: u8,
    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,
    pub level_type: u16,
    pub is_layer: bool,

    /// Statistical processing type, or -1 for instantaneous values
    pub interval_type: i32,

    /// Name of the statistical interval, eg "6 Hour". Empty for instantaneous values.
    pub interval_name: String,

    /// Derived ensemble forecast type, or -1
    pub ens_derived_type: i32,

    /// Probability type, or -1
    pub probability_type: i32,

    /// Name of the probability, eg "above 273.15K". Empty if not a probability.
    pub probability_name: String,
}

impl ParamIdentity {
    /// Create an identity for an instantaneous, deterministic parameter.
    ///
    pub fn new(discipline: u8, category: u8, parameter: u8, level_type: u16) -> Self {
        Self {
            table_version: 2,
            discipline,
            category,
            parameter,
            level_type,
            is_layer: false,
            interval_type: -1,
            interval_name: String::new(),
            ens_derived_type: -1,
            probability_type: -1,
            probability_name: String::new(),
        }
    }

    /// Stable content hash of this identity, used to match variables across partitions.
    ///
    pub fn cdm_hash(&self) -> u32 {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[
            self.table_version,
            self.discipline,
            self.category,
            self.parameter,
        ]);
        bytes.extend_from_slice(&self.level_type.to_be_bytes());
        bytes.push(self.is_layer as u8);
        bytes.extend_from_slice(&self.interval_type.to_be_bytes());
        bytes.extend_from_slice(&(self.interval_name.len() as u32).to_be_bytes());
        bytes.extend_from_slice(self.interval_name.as_bytes());
        bytes.extend_from_slice(&self.ens_derived_type.to_be_bytes());
        bytes.extend_from_slice(&self.probability_type.to_be_bytes());
        bytes.extend_from_slice(&(self.probability_name.len() as u32).to_be_bytes());
        bytes.extend_from_slice(self.probability_name.as_bytes());

        content_hash(&bytes)
    }

    /// A short, unique-enough name for logs and diagnostics, eg "VAR_0-1-8_L1_I6 Hour".
    ///
    pub fn name(&self) -> String {
        let mut name = format!(
            "VAR_{}-{}-{}_L{}",
            self.discipline, self.category, self.parameter, self.level_type
        );
        if self.is_layer {
            name.push_str("_layer");
        }
        if self.interval_type >= 0 {
            name.push_str(&format!("_I{}", self.interval_name));
        }
        if self.ens_derived_type >= 0 {
            name.push_str(&format!("_D{}", self.ens_derived_type));
        }
        if self.probability_type >= 0 {
            name.push_str(&format!("_Prob_{}", self.probability_name));
        }

        name
    }

    pub(crate) fn write_to(&self, stream: &mut impl Write) -> io::Result<()> {
        stream.write_byte(self.table_version)?;
        stream.write_byte(self.discipline)?;
        stream.write_byte(self.category)?;
        stream.write_byte(self.parameter)?;
        stream.write_u16(self.level_type)?;
        stream.write_byte(self.is_layer as u8)?;
        stream.write_i32(self.interval_type)?;
        stream.write_str(&self.interval_name)?;
        stream.write_i32(self.ens_derived_type)?;
        stream.write_i32(self.probability_type)?;
        stream.write_str(&self.probability_name)?;

        Ok(())
    }

    pub(crate) fn read_from(stream: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            table_version: stream.read_byte()?,
            discipline: stream.read_byte()?,
            category: stream.read_byte()?,
            parameter: stream.read_byte()?,
            level_type: stream.read_u16()?,
            is_layer: stream.read_byte()? != 0,
            interval_type: stream.read_i32()?,
            interval_name: stream.read_string()?,
            ens_derived_type: stream.read_i32()?,
            probability_type: stream.read_i32()?,
            probability_name: stream.read_string()?,
        })
    }
}
