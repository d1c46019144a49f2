// SPDX-License-Identifier: Apache-2.0

//! Registry of the structured interface shapes a foreign module can be
//! wrapped in, and the member lists each shape expands to.
//!
//! All member directions are written from the wrapped module's point of view
//! for an interface declared with `direction = "in"` (the module responds on
//! the bus). Declaring `direction = "out"` flips every member.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rtlwrap_error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn flip(self) -> Direction {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
            Direction::InOut => Direction::InOut,
        }
    }

    /// Whether a module port declared `self` can carry a member that needs
    /// `wanted`.
    pub fn can_carry(self, wanted: Direction) -> bool {
        self == Direction::InOut || self == wanted
    }

    pub fn verilog_keyword(self) -> &'static str {
        match self {
            Direction::In => "input",
            Direction::Out => "output",
            Direction::InOut => "inout",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verilog_keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WishboneFeature {
    Err,
    Rty,
    Stall,
    Lock,
    Cti,
    Bte,
}

impl WishboneFeature {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "err" => Some(WishboneFeature::Err),
            "rty" => Some(WishboneFeature::Rty),
            "stall" => Some(WishboneFeature::Stall),
            "lock" => Some(WishboneFeature::Lock),
            "cti" => Some(WishboneFeature::Cti),
            "bte" => Some(WishboneFeature::Bte),
            _ => None,
        }
    }
}

/// One named member of a shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Empty for scalar shapes; the interface name is then the whole path.
    pub name: String,
    pub width: u32,
    pub direction: Direction,
    /// Optional members are left unbound when no signal matches.
    pub required: bool,
    /// Name fragments the auto-mapper searches for, most specific first.
    #[serde(skip)]
    pub aliases: Vec<String>,
}

impl Member {
    fn new(name: &str, width: u32, direction: Direction, aliases: &[&str]) -> Self {
        Member {
            name: name.to_string(),
            width,
            direction,
            required: true,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn flipped(mut self) -> Self {
        self.direction = self.direction.flip();
        self
    }

    /// Full access path of this member inside interface `interface`.
    pub fn path(&self, interface: &str) -> String {
        if self.name.is_empty() {
            interface.to_string()
        } else {
            format!("{interface}.{}", self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterfaceShape {
    Wishbone {
        addr_width: u32,
        data_width: u32,
        granularity: u32,
        features: BTreeSet<WishboneFeature>,
    },
    Csr {
        addr_width: u32,
        data_width: u32,
    },
    Gpio {
        pin_count: u32,
    },
    Uart,
    I2c,
    Spi,
    /// A bare `in(N)` / `out(N)` signal.
    Scalar {
        direction: Direction,
        width: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Wishbone,
    Csr,
    Gpio,
    Uart,
    I2c,
    Spi,
    Scalar(Direction, u32),
}

static SCALAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z_][a-z0-9_]*\.)*(in|out)\(\s*(\d+)\s*\)$").unwrap()
});

impl ShapeKind {
    /// Accepts the short tags (`wishbone`, `out(1)`) as well as dotted
    /// legacy names such as `amaranth_soc.wishbone.Signature` or
    /// `chipflow_lib.platforms.GPIOSignature`.
    fn parse(interface: &str) -> Option<ShapeKind> {
        let lowered = interface.trim().to_ascii_lowercase();
        if let Some(caps) = SCALAR_RE.captures(&lowered) {
            let direction = if &caps[1] == "in" {
                Direction::In
            } else {
                Direction::Out
            };
            let width: u32 = caps[2].parse().ok()?;
            return Some(ShapeKind::Scalar(direction, width));
        }
        for segment in lowered.rsplit('.') {
            let stem = segment.strip_suffix("signature").unwrap_or(segment);
            let kind = match stem {
                "wishbone" => ShapeKind::Wishbone,
                "csr" => ShapeKind::Csr,
                "gpio" => ShapeKind::Gpio,
                "uart" => ShapeKind::Uart,
                "i2c" => ShapeKind::I2c,
                "spi" => ShapeKind::Spi,
                _ => continue,
            };
            return Some(kind);
        }
        None
    }
}

/// Typed view over an interface's `params` table after `{name}` references
/// have been resolved.
struct Params<'a> {
    table: &'a toml::Table,
    field: &'a str,
    allowed: &'static [&'static str],
}

impl<'a> Params<'a> {
    fn new(
        table: &'a toml::Table,
        field: &'a str,
        allowed: &'static [&'static str],
    ) -> Result<Self, ConfigError> {
        for key in table.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(ConfigError::new(
                    format!("{field}.params.{key}"),
                    if allowed.is_empty() {
                        "this interface takes no parameters".to_string()
                    } else {
                        format!("unknown parameter; expected one of {}", allowed.join(", "))
                    },
                ));
            }
        }
        Ok(Params {
            table,
            field,
            allowed,
        })
    }

    fn key_field(&self, key: &str) -> String {
        debug_assert!(self.allowed.contains(&key));
        format!("{}.params.{key}", self.field)
    }

    fn width(&self, key: &str, default: Option<u32>) -> Result<u32, ConfigError> {
        let value = match self.table.get(key) {
            Some(v) => v,
            None => {
                return default.ok_or_else(|| {
                    ConfigError::new(self.key_field(key), "required parameter is missing")
                })
            }
        };
        let n = value.as_integer().ok_or_else(|| {
            ConfigError::new(
                self.key_field(key),
                format!("expected an integer, got {}", value.type_str()),
            )
        })?;
        if !(1..=64).contains(&n) {
            return Err(ConfigError::new(
                self.key_field(key),
                format!("{n} is outside the supported range 1..=64"),
            ));
        }
        Ok(n as u32)
    }

    fn features(&self) -> Result<BTreeSet<WishboneFeature>, ConfigError> {
        let Some(value) = self.table.get("features") else {
            return Ok(BTreeSet::new());
        };
        let field = self.key_field("features");
        let items = value
            .as_array()
            .ok_or_else(|| ConfigError::new(&field, "expected an array of feature names"))?;
        let mut features = BTreeSet::new();
        for item in items {
            let name = item
                .as_str()
                .ok_or_else(|| ConfigError::new(&field, "feature names must be strings"))?;
            let feature = WishboneFeature::parse(&name.to_ascii_lowercase()).ok_or_else(|| {
                ConfigError::new(
                    &field,
                    format!("unknown feature `{name}`; expected err, rty, stall, lock, cti or bte"),
                )
            })?;
            features.insert(feature);
        }
        Ok(features)
    }
}

fn bus_width(field: String, value: u32) -> Result<u32, ConfigError> {
    if [8, 16, 32, 64].contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::new(
            field,
            format!("{value} is not one of 8, 16, 32, 64"),
        ))
    }
}

impl InterfaceShape {
    /// Builds a shape from an interface tag and its resolved parameters.
    /// `field` is the config path of the interface, used in errors.
    pub fn from_config(
        interface: &str,
        params: &toml::Table,
        field: &str,
    ) -> Result<InterfaceShape, ConfigError> {
        let kind = ShapeKind::parse(interface).ok_or_else(|| {
            ConfigError::new(
                format!("{field}.interface"),
                format!(
                    "unknown interface `{interface}`; expected wishbone, csr, gpio, uart, i2c, spi, in(N) or out(N)"
                ),
            )
        })?;
        let shape = match kind {
            ShapeKind::Wishbone => {
                let p = Params::new(
                    params,
                    field,
                    &["addr_width", "data_width", "granularity", "features"],
                )?;
                let addr_width = p.width("addr_width", None)?;
                let data_width = bus_width(p.key_field("data_width"), p.width("data_width", None)?)?;
                let granularity = bus_width(
                    p.key_field("granularity"),
                    p.width("granularity", Some(data_width))?,
                )?;
                if granularity > data_width {
                    return Err(ConfigError::new(
                        p.key_field("granularity"),
                        format!("granularity {granularity} exceeds data_width {data_width}"),
                    ));
                }
                InterfaceShape::Wishbone {
                    addr_width,
                    data_width,
                    granularity,
                    features: p.features()?,
                }
            }
            ShapeKind::Csr => {
                let p = Params::new(params, field, &["addr_width", "data_width"])?;
                InterfaceShape::Csr {
                    addr_width: p.width("addr_width", None)?,
                    data_width: p.width("data_width", None)?,
                }
            }
            ShapeKind::Gpio => {
                let p = Params::new(params, field, &["pin_count"])?;
                InterfaceShape::Gpio {
                    pin_count: p.width("pin_count", None)?,
                }
            }
            ShapeKind::Uart | ShapeKind::I2c | ShapeKind::Spi => {
                Params::new(params, field, &[])?;
                match kind {
                    ShapeKind::Uart => InterfaceShape::Uart,
                    ShapeKind::I2c => InterfaceShape::I2c,
                    _ => InterfaceShape::Spi,
                }
            }
            ShapeKind::Scalar(direction, width) => {
                Params::new(params, field, &[])?;
                if !(1..=64).contains(&width) {
                    return Err(ConfigError::new(
                        format!("{field}.interface"),
                        format!("scalar width {width} is outside the supported range 1..=64"),
                    ));
                }
                InterfaceShape::Scalar { direction, width }
            }
        };
        Ok(shape)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, InterfaceShape::Scalar { .. })
    }

    pub fn tag(&self) -> String {
        match self {
            InterfaceShape::Wishbone { .. } => "wishbone".to_string(),
            InterfaceShape::Csr { .. } => "csr".to_string(),
            InterfaceShape::Gpio { .. } => "gpio".to_string(),
            InterfaceShape::Uart => "uart".to_string(),
            InterfaceShape::I2c => "i2c".to_string(),
            InterfaceShape::Spi => "spi".to_string(),
            InterfaceShape::Scalar { direction, width } => match direction {
                Direction::Out => format!("out({width})"),
                _ => format!("in({width})"),
            },
        }
    }

    /// Members in declaration order, oriented for an interface declared
    /// with `direction`. Scalar shapes carry their own direction and ignore
    /// the argument.
    pub fn members(&self, direction: Direction) -> Vec<Member> {
        use Direction::{In, Out};
        let members = match self {
            InterfaceShape::Wishbone {
                addr_width,
                data_width,
                granularity,
                features,
            } => {
                let mut m = vec![
                    Member::new("adr", *addr_width, In, &["adr", "addr", "address"]),
                    Member::new("dat_w", *data_width, In, &["dat_w", "wdata", "dat", "data"]),
                    Member::new("dat_r", *data_width, Out, &["dat_r", "rdata", "dat", "data"]),
                ];
                if granularity < data_width {
                    m.push(Member::new(
                        "sel",
                        data_width / granularity,
                        In,
                        &["sel", "be", "byteen"],
                    ));
                }
                m.push(Member::new("cyc", 1, In, &["cyc", "cycle"]));
                m.push(Member::new("stb", 1, In, &["stb", "strobe"]));
                m.push(Member::new("we", 1, In, &["we", "wen", "write_en"]));
                m.push(Member::new("ack", 1, Out, &["ack", "acknowledge"]));
                for feature in features {
                    m.push(match feature {
                        WishboneFeature::Err => Member::new("err", 1, Out, &["err", "error"]),
                        WishboneFeature::Rty => Member::new("rty", 1, Out, &["rty", "retry"]),
                        WishboneFeature::Stall => Member::new("stall", 1, Out, &["stall"]),
                        WishboneFeature::Lock => Member::new("lock", 1, In, &["lock"]),
                        WishboneFeature::Cti => Member::new("cti", 3, In, &["cti"]),
                        WishboneFeature::Bte => Member::new("bte", 2, In, &["bte"]),
                    });
                }
                m
            }
            InterfaceShape::Csr {
                addr_width,
                data_width,
            } => vec![
                Member::new("addr", *addr_width, In, &["addr", "adr", "address"]),
                Member::new("r_data", *data_width, Out, &["r_data", "rdata", "dat_r", "data"]),
                Member::new("r_stb", 1, In, &["r_stb", "re", "rd_en", "read"]).optional(),
                Member::new("w_data", *data_width, In, &["w_data", "wdata", "dat_w", "data"]),
                Member::new("w_stb", 1, In, &["w_stb", "we", "wr_en", "write"]),
            ],
            InterfaceShape::Gpio { pin_count } => vec![
                Member::new("i", *pin_count, In, &["i", "in", "gpio"]),
                Member::new("o", *pin_count, Out, &["o", "out", "gpio"]),
                Member::new("oe", *pin_count, Out, &["oe", "output_enable", "en"]),
            ],
            InterfaceShape::Uart => vec![
                Member::new("tx.o", 1, Out, &["tx", "txd"]),
                Member::new("rx.i", 1, In, &["rx", "rxd"]),
            ],
            InterfaceShape::I2c => vec![
                Member::new("scl.i", 1, In, &["scl"]),
                Member::new("scl.oe", 1, Out, &["scl_oe", "scl"]),
                Member::new("sda.i", 1, In, &["sda"]),
                Member::new("sda.oe", 1, Out, &["sda_oe", "sda"]),
            ],
            InterfaceShape::Spi => vec![
                Member::new("sck.o", 1, Out, &["sck", "sclk", "spi_clk"]),
                Member::new("copi.o", 1, Out, &["copi", "mosi", "sdo"]),
                Member::new("cipo.i", 1, In, &["cipo", "miso", "sdi"]),
                Member::new("csn.o", 1, Out, &["csn", "cs_n", "cs", "ss_n", "ss"]),
            ],
            InterfaceShape::Scalar { direction, width } => {
                return vec![Member::new("", *width, *direction, &[])];
            }
        };
        match direction {
            Direction::Out => members.into_iter().map(Member::flipped).collect(),
            _ => members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(text: &str) -> toml::Table {
        text.parse::<toml::Table>().unwrap()
    }

    fn names(members: &[Member]) -> Vec<&str> {
        members.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn wishbone_without_sel_when_granularity_matches_width() {
        let shape = InterfaceShape::from_config(
            "wishbone",
            &params("addr_width = 4\ndata_width = 32"),
            "ports.bus",
        )
        .unwrap();
        let members = shape.members(Direction::In);
        assert_eq!(
            names(&members),
            vec!["adr", "dat_w", "dat_r", "cyc", "stb", "we", "ack"]
        );
        assert_eq!(members[0].width, 4);
        assert_eq!(members[2].direction, Direction::Out);
    }

    #[test]
    fn wishbone_byte_granularity_adds_sel_and_features() {
        let shape = InterfaceShape::from_config(
            "amaranth_soc.wishbone.Signature",
            &params("addr_width = 30\ndata_width = 32\ngranularity = 8\nfeatures = [\"err\", \"cti\"]"),
            "ports.bus",
        )
        .unwrap();
        let members = shape.members(Direction::In);
        assert_eq!(
            names(&members),
            vec!["adr", "dat_w", "dat_r", "sel", "cyc", "stb", "we", "ack", "err", "cti"]
        );
        assert_eq!(members[3].width, 4);
        assert_eq!(members[9].width, 3);
    }

    #[test]
    fn out_direction_flips_members() {
        let shape = InterfaceShape::Uart;
        let members = shape.members(Direction::Out);
        assert_eq!(members[0].direction, Direction::In);
        assert_eq!(members[1].direction, Direction::Out);
    }

    #[test]
    fn scalar_tags_parse_with_and_without_module_path() {
        let a = InterfaceShape::from_config("out(1)", &toml::Table::new(), "pins.irq").unwrap();
        let b = InterfaceShape::from_config(
            "amaranth.lib.wiring.Out(1)",
            &toml::Table::new(),
            "pins.irq",
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tag(), "out(1)");
        let members = a.members(Direction::In);
        assert_eq!(members[0].direction, Direction::Out);
        assert_eq!(members[0].path("irq"), "irq");
    }

    #[test]
    fn legacy_platform_names_resolve() {
        let gpio = InterfaceShape::from_config(
            "chipflow_lib.platforms.GPIOSignature",
            &params("pin_count = 8"),
            "pins.gpio",
        )
        .unwrap();
        assert_eq!(gpio, InterfaceShape::Gpio { pin_count: 8 });
        let uart = InterfaceShape::from_config(
            "chipflow_lib.platforms.UARTSignature",
            &toml::Table::new(),
            "pins.uart",
        )
        .unwrap();
        assert_eq!(uart, InterfaceShape::Uart);
    }

    #[test]
    fn unknown_param_is_named() {
        let err = InterfaceShape::from_config(
            "csr",
            &params("addr_width = 4\ndata_width = 8\nbogus = 1"),
            "ports.regs",
        )
        .unwrap_err();
        assert_eq!(err.field, "ports.regs.params.bogus");
    }

    #[test]
    fn missing_required_param_is_named() {
        let err =
            InterfaceShape::from_config("wishbone", &params("data_width = 32"), "ports.bus")
                .unwrap_err();
        assert_eq!(err.field, "ports.bus.params.addr_width");
    }

    #[test]
    fn wishbone_rejects_odd_data_width() {
        let err = InterfaceShape::from_config(
            "wishbone",
            &params("addr_width = 4\ndata_width = 24"),
            "ports.bus",
        )
        .unwrap_err();
        assert_eq!(err.field, "ports.bus.params.data_width");
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let err = InterfaceShape::from_config("axi4", &toml::Table::new(), "ports.bus")
            .unwrap_err();
        assert_eq!(err.field, "ports.bus.interface");
    }

    #[test]
    fn csr_read_strobe_is_optional() {
        let shape = InterfaceShape::Csr {
            addr_width: 4,
            data_width: 8,
        };
        let members = shape.members(Direction::In);
        let r_stb = members.iter().find(|m| m.name == "r_stb").unwrap();
        assert!(!r_stb.required);
        assert!(members.iter().filter(|m| m.name != "r_stb").all(|m| m.required));
    }
}
