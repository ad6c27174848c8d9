//! Device definition types
//!
//! A definition describes one product: its application registers and the
//! typed endpoints laid over them. Definitions are validated once when they
//! are loaded; the endpoint layer relies on the checks made here.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use swap_link::bytes::MAX_INTEGER_WIDTH;
use swap_link::{ProductCode, StandardRegister};

use crate::error::{GatewayError, Result};

/// Application type of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    #[serde(rename = "bin", alias = "binary")]
    Binary,
    #[serde(rename = "int", alias = "integer")]
    Integer,
    #[serde(rename = "num", alias = "number")]
    Number,
    #[serde(rename = "str", alias = "string")]
    String,
    #[serde(rename = "bstr", alias = "bytes")]
    ByteString,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Binary => "bin",
            EndpointKind::Integer => "int",
            EndpointKind::Number => "num",
            EndpointKind::String => "str",
            EndpointKind::ByteString => "bstr",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the node reports the endpoint or accepts writes to it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "in", alias = "input")]
    Input,
    #[serde(rename = "out", alias = "output")]
    Output,
}

/// Where an endpoint starts inside its register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub byte: usize,
    /// Bit within `byte`, binary endpoints only
    #[serde(default)]
    pub bit: u8,
}

/// How much of the register an endpoint covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    #[serde(default = "default_size_bytes")]
    pub bytes: usize,
    #[serde(default)]
    pub bits: u8,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            bytes: default_size_bytes(),
            bits: 0,
        }
    }
}

/// Named linear transform: `physical = raw * factor + offset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Unit {
    pub fn new(name: impl Into<String>, factor: f64, offset: f64) -> Self {
        Self {
            name: name.into(),
            factor,
            offset,
        }
    }

    pub fn to_physical(&self, raw: f64) -> f64 {
        raw * self.factor + self.offset
    }

    pub fn to_raw(&self, physical: f64) -> f64 {
        (physical - self.offset) / self.factor
    }

    fn validate(&self, endpoint: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::definition(format!(
                "endpoint '{}' has a unit without a name",
                endpoint
            )));
        }
        if !self.factor.is_finite() || self.factor == 0.0 {
            return Err(GatewayError::definition(format!(
                "unit '{}' of endpoint '{}' has invalid factor {}",
                self.name, endpoint, self.factor
            )));
        }
        if !self.offset.is_finite() {
            return Err(GatewayError::definition(format!(
                "unit '{}' of endpoint '{}' has invalid offset {}",
                self.name, endpoint, self.offset
            )));
        }
        Ok(())
    }
}

/// One typed view over part of a register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDefinition {
    pub name: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: EndpointKind,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EndpointDefinition {
    pub fn new(name: impl Into<String>, kind: EndpointKind, byte: usize, bytes: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            direction: Direction::Input,
            position: Position { byte, bit: 0 },
            size: Size { bytes, bits: 0 },
            units: Vec::new(),
            description: None,
        }
    }

    pub fn with_bit(mut self, bit: u8) -> Self {
        self.position.bit = bit;
        self.size = Size { bytes: 1, bits: 1 };
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    /// One past the last register byte this endpoint touches
    pub fn end_byte(&self) -> usize {
        self.position.byte + self.size.bytes
    }

    fn validate(&self, register_length: usize) -> Result<()> {
        let fail = |msg: String| {
            Err(GatewayError::definition(format!(
                "endpoint '{}': {}",
                self.name, msg
            )))
        };

        if self.name.trim().is_empty() {
            return Err(GatewayError::definition("endpoint without a name"));
        }

        match self.kind {
            EndpointKind::Binary => {
                if self.position.bit >= 8 {
                    return fail(format!("bit offset {} outside 0..8", self.position.bit));
                }
                if self.size.bytes != 1 {
                    return fail(format!(
                        "binary endpoint must cover 1 byte, not {}",
                        self.size.bytes
                    ));
                }
            },
            EndpointKind::Integer | EndpointKind::Number => {
                if self.size.bytes == 0 || self.size.bytes > MAX_INTEGER_WIDTH {
                    return fail(format!(
                        "width {} outside 1..={}",
                        self.size.bytes, MAX_INTEGER_WIDTH
                    ));
                }
            },
            EndpointKind::String | EndpointKind::ByteString => {
                if self.size.bytes == 0 {
                    return fail("zero-width field".to_string());
                }
            },
        }

        if self.end_byte() > register_length {
            return fail(format!(
                "bytes {}..{} exceed register length {}",
                self.position.byte,
                self.end_byte(),
                register_length
            ));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            unit.validate(&self.name)?;
            if !seen.insert(unit.name.as_str()) {
                return fail(format!("duplicate unit '{}'", unit.name));
            }
        }
        Ok(())
    }
}

/// One register of a product and the endpoints laid over it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    pub id: u8,
    #[serde(default)]
    pub name: String,
    /// Declared length; defaults to the furthest endpoint byte
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}

impl RegisterDefinition {
    pub fn new(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            length: None,
            endpoints: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointDefinition) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Declared length, or the extent of the endpoints when none is given
    pub fn effective_length(&self) -> usize {
        self.length.unwrap_or_else(|| {
            self.endpoints
                .iter()
                .map(EndpointDefinition::end_byte)
                .max()
                .unwrap_or(0)
        })
    }
}

/// Everything known about one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub manufacturer_id: u32,
    pub product_id: u32,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub registers: Vec<RegisterDefinition>,
}

impl DeviceDefinition {
    pub fn new(manufacturer_id: u32, product_id: u32) -> Self {
        Self {
            manufacturer_id,
            product_id,
            manufacturer: String::new(),
            product: String::new(),
            registers: Vec::new(),
        }
    }

    pub fn with_names(mut self, manufacturer: impl Into<String>, product: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self.product = product.into();
        self
    }

    pub fn with_register(mut self, register: RegisterDefinition) -> Self {
        self.registers.push(register);
        self
    }

    pub fn product_code(&self) -> ProductCode {
        ProductCode::new(self.manufacturer_id, self.product_id)
    }

    pub fn register(&self, id: u8) -> Option<&RegisterDefinition> {
        self.registers.iter().find(|r| r.id == id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&RegisterDefinition, &EndpointDefinition)> {
        self.registers
            .iter()
            .flat_map(|reg| reg.endpoints.iter().map(move |ep| (reg, ep)))
    }

    /// Check the whole definition before it is used
    pub fn validate(&self) -> Result<()> {
        let mut register_ids = HashSet::new();
        let mut endpoint_names = HashSet::new();

        for register in &self.registers {
            if !register_ids.insert(register.id) {
                return Err(GatewayError::definition(format!(
                    "{}: register {} declared twice",
                    self.product_code(),
                    register.id
                )));
            }
            if let Some(standard) = StandardRegister::from_id(register.id) {
                if register.effective_length() > standard.length() {
                    return Err(GatewayError::definition(format!(
                        "{}: register {} ({}) is {} bytes, declared {}",
                        self.product_code(),
                        register.id,
                        standard,
                        standard.length(),
                        register.effective_length()
                    )));
                }
            }

            let length = register.effective_length();
            for endpoint in &register.endpoints {
                endpoint.validate(length)?;
                if !endpoint_names.insert(endpoint.name.as_str()) {
                    return Err(GatewayError::definition(format!(
                        "{}: endpoint '{}' declared twice",
                        self.product_code(),
                        endpoint.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }
}

fn default_size_bytes() -> usize {
    1
}

fn default_factor() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const METER_YAML: &str = r#"
manufacturer_id: 1
product_id: 2
manufacturer: Acme
product: Meter
registers:
  - id: 11
    name: Readings
    length: 4
    endpoints:
      - name: door
        type: bin
        position: { byte: 0, bit: 3 }
      - name: temperature
        type: int
        position: { byte: 1 }
        size: { bytes: 2 }
        units:
          - name: C
            factor: 0.1
            offset: -50
          - name: raw
      - name: tag
        type: str
        position: { byte: 3 }
"#;

    #[test]
    fn test_parse_yaml_definition() {
        let def = DeviceDefinition::from_yaml_str(METER_YAML).unwrap();
        assert_eq!(def.product_code(), ProductCode::new(1, 2));
        assert_eq!(def.product, "Meter");

        let reg = def.register(11).unwrap();
        assert_eq!(reg.effective_length(), 4);
        assert_eq!(reg.endpoints[0].kind, EndpointKind::Binary);
        assert_eq!(reg.endpoints[0].position.bit, 3);

        let temperature = &reg.endpoints[1];
        assert_eq!(temperature.size.bytes, 2);
        assert_eq!(temperature.unit("C").unwrap().offset, -50.0);
        assert_eq!(temperature.unit("raw").unwrap().factor, 1.0);
        assert!(temperature.unit("F").is_none());
    }

    #[test]
    fn test_unit_transform_inverse() {
        let unit = Unit::new("x", 2.0, 3.0);
        assert_eq!(unit.to_physical(5.0), 13.0);
        assert_eq!(unit.to_raw(13.0), 5.0);
    }

    #[test]
    fn test_zero_factor_rejected() {
        let def = DeviceDefinition::new(1, 2).with_register(
            RegisterDefinition::new(11, "r").with_endpoint(
                EndpointDefinition::new("v", EndpointKind::Integer, 0, 1)
                    .with_unit(Unit::new("bad", 0.0, 0.0)),
            ),
        );
        let err = def.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Definition(_)), "{err}");

        let nan = DeviceDefinition::new(1, 2).with_register(
            RegisterDefinition::new(11, "r").with_endpoint(
                EndpointDefinition::new("v", EndpointKind::Number, 0, 1)
                    .with_unit(Unit::new("bad", f64::NAN, 0.0)),
            ),
        );
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_bounds_rejected() {
        let too_long = DeviceDefinition::new(1, 2).with_register(
            RegisterDefinition::new(11, "r")
                .with_length(2)
                .with_endpoint(EndpointDefinition::new("v", EndpointKind::Integer, 1, 2)),
        );
        assert!(too_long.validate().is_err());

        let mut bad_bit = EndpointDefinition::new("b", EndpointKind::Binary, 0, 1);
        bad_bit.position.bit = 8;
        let def = DeviceDefinition::new(1, 2)
            .with_register(RegisterDefinition::new(11, "r").with_endpoint(bad_bit));
        assert!(def.validate().is_err());

        let wide = DeviceDefinition::new(1, 2).with_register(
            RegisterDefinition::new(11, "r")
                .with_endpoint(EndpointDefinition::new("v", EndpointKind::Integer, 0, 9)),
        );
        assert!(wide.validate().is_err());
    }

    #[test]
    fn test_duplicates_rejected() {
        let def = DeviceDefinition::new(1, 2)
            .with_register(RegisterDefinition::new(11, "a"))
            .with_register(RegisterDefinition::new(11, "b"));
        assert!(def.validate().is_err());

        let def = DeviceDefinition::new(1, 2).with_register(
            RegisterDefinition::new(11, "a")
                .with_endpoint(EndpointDefinition::new("v", EndpointKind::Integer, 0, 1))
                .with_endpoint(EndpointDefinition::new("v", EndpointKind::Integer, 1, 1)),
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_standard_register_length_enforced() {
        let def = DeviceDefinition::new(1, 2).with_register(
            RegisterDefinition::new(StandardRegister::FrequencyChannel.id(), "channel")
                .with_endpoint(EndpointDefinition::new("ch", EndpointKind::Integer, 0, 2)),
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_json_definition() {
        let json = r#"{
            "manufacturer_id": 16,
            "product_id": 32,
            "registers": [
                {"id": 12, "endpoints": [{"name": "level", "type": "num", "size": {"bytes": 2}}]}
            ]
        }"#;
        let def = DeviceDefinition::from_json_str(json).unwrap();
        assert_eq!(def.register(12).unwrap().effective_length(), 2);
        assert_eq!(def.endpoints().count(), 1);
    }
}
