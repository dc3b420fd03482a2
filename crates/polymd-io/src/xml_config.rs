//! XML run configuration.
//!
//! ```xml
//! <mdproject>
//!   <header><version>20120401</version></header>
//!   <experiment>
//!     <timestep-length>0.002</timestep-length>
//!     <cutoff-radius>2.5</cutoff-radius>
//!     <phase-space source="equilibrated.inp" format="ASCII"/>
//!     <data-structure><linked-cells cells-in-cutoff="1"/></data-structure>
//!     <output writers="res,ckp" frequency="100" prefix="runA" incremental="false"/>
//!     <epsilon-rf>inf</epsilon-rf>
//!     <target-temperature>0.7</target-temperature>
//!   </experiment>
//! </mdproject>
//! ```
//!
//! The phase-space source supplies components and molecules; values given
//! in the XML override those read from the source file.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use polymd_core::config::{WriterKind, MIN_CONFIG_VERSION};
use polymd_core::errors::{PolymdError, Result};

use crate::phase_space::{read_phase_space, PhaseSpaceData};

#[derive(Debug, Default)]
struct XmlValues {
    version: Option<u64>,
    timestep_length: Option<f64>,
    cutoff_radius: Option<f64>,
    phase_space_source: Option<String>,
    phase_space_format: Option<String>,
    components_source: Option<String>,
    components_format: Option<String>,
    cells_in_cutoff: Option<usize>,
    adaptive_subcells: bool,
    writers: Option<Vec<WriterKind>>,
    output_frequency: Option<u64>,
    output_prefix: Option<String>,
    incremental: Option<bool>,
    epsilon_rf: Option<f64>,
    target_temperature: Option<f64>,
}

/// Parse the XML configuration and load the referenced phase space.
pub fn read_xml_config(path: &Path) -> Result<PhaseSpaceData> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| PolymdError::config(format!("{}: {}", path.display(), e)))?;
    let values = parse_values(&xml)?;

    let version = values
        .version
        .ok_or_else(|| PolymdError::config("missing header/version"))?;
    if version < MIN_CONFIG_VERSION {
        return Err(PolymdError::config(format!(
            "config version {} is older than the minimum supported {}",
            version, MIN_CONFIG_VERSION
        )));
    }
    if values.adaptive_subcells {
        return Err(PolymdError::config(
            "data structure adaptiveSubCells is not supported; use linked-cells",
        ));
    }
    if let Some(fmt) = &values.phase_space_format {
        if fmt != "ASCII" {
            return Err(PolymdError::config(format!(
                "unsupported phase-space format '{}' (expected ASCII)",
                fmt
            )));
        }
    }

    let source = values
        .phase_space_source
        .as_ref()
        .ok_or_else(|| PolymdError::config("missing experiment/phase-space@source"))?;
    let source_path = path.parent().unwrap_or(Path::new("")).join(source);
    let mut data = read_phase_space(&source_path)?;

    // A separate component definition file replaces whatever the phase
    // space carried.
    if let Some(comp_source) = &values.components_source {
        match values.components_format.as_deref() {
            None | Some("ASCII-internal") | Some("ASCII-external") => {}
            Some(other) => {
                return Err(PolymdError::config(format!(
                    "component format '{}' is not supported (use ASCII-internal or ASCII-external)",
                    other
                )))
            }
        }
        let comp_path = path.parent().unwrap_or(Path::new("")).join(comp_source);
        let comp_data = read_phase_space(&comp_path)?;
        if comp_data.components.is_empty() {
            return Err(PolymdError::config(format!(
                "component source {} defines no components",
                comp_path.display()
            )));
        }
        data.components = comp_data.components;
    }

    if let Some(v) = values.timestep_length {
        data.config.timestep_length = v;
    }
    if let Some(v) = values.cutoff_radius {
        data.config.cutoff_radius = v;
    }
    if let Some(v) = values.cells_in_cutoff {
        data.config.cells_in_cutoff = v;
    }
    if let Some(v) = values.writers {
        data.config.output_writers = v;
    }
    if let Some(v) = values.output_frequency {
        data.config.output_frequency = v;
    }
    if let Some(v) = values.output_prefix {
        data.config.output_prefix = v;
    }
    if let Some(v) = values.incremental {
        data.config.incremental_output = v;
    }
    if let Some(v) = values.epsilon_rf {
        data.config.epsilon_rf = v;
    }
    if let Some(v) = values.target_temperature {
        data.config.target_temperature = Some(v);
    }
    Ok(data)
}

fn parse_values(xml: &str) -> Result<XmlValues> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut values = XmlValues::default();
    let mut element_stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = tag_name(&e);
                handle_element(&mut values, &name, &e)?;
                element_stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = tag_name(&e);
                handle_element(&mut values, &name, &e)?;
            }
            Ok(Event::End(_)) => {
                element_stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| PolymdError::config(format!("bad XML text: {}", e)))?
                    .into_owned();
                if let Some(current) = element_stack.last() {
                    handle_text(&mut values, current, text.trim())?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(PolymdError::config(format!("malformed XML: {}", e)));
            }
        }
        buf.clear();
    }
    Ok(values)
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attr(e: &BytesStart, key: &str) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|e| PolymdError::config(format!("bad XML attribute: {}", e)))?;
        if a.key.as_ref() == key.as_bytes() {
            let v = a
                .unescape_value()
                .map_err(|e| PolymdError::config(format!("bad XML attribute value: {}", e)))?;
            return Ok(Some(v.into_owned()));
        }
    }
    Ok(None)
}

fn handle_element(values: &mut XmlValues, name: &str, e: &BytesStart) -> Result<()> {
    match name {
        "phase-space" => {
            values.phase_space_source = attr(e, "source")?;
            values.phase_space_format = attr(e, "format")?;
        }
        "components" => {
            values.components_source = attr(e, "source")?;
            values.components_format = attr(e, "format")?;
        }
        "linked-cells" => {
            if let Some(v) = attr(e, "cells-in-cutoff")? {
                values.cells_in_cutoff = Some(parse_num(&v, "cells-in-cutoff")?);
            }
        }
        "adaptiveSubCells" => {
            values.adaptive_subcells = true;
        }
        "output" => {
            if let Some(list) = attr(e, "writers")? {
                let mut writers = Vec::new();
                for token in list.split(',').filter(|s| !s.is_empty()) {
                    writers.push(WriterKind::parse(token.trim())?);
                }
                values.writers = Some(writers);
            }
            if let Some(v) = attr(e, "frequency")? {
                values.output_frequency = Some(parse_num(&v, "output frequency")?);
            }
            values.output_prefix = attr(e, "prefix")?;
            if let Some(v) = attr(e, "incremental")? {
                values.incremental = Some(v == "true" || v == "1");
            }
        }
        _ => {}
    }
    Ok(())
}

fn handle_text(values: &mut XmlValues, element: &str, text: &str) -> Result<()> {
    match element {
        "version" => values.version = Some(parse_num(text, "header/version")?),
        "timestep-length" => {
            let v: f64 = parse_num(text, "timestep-length")?;
            if v <= 0.0 {
                return Err(PolymdError::config("timestep-length must be positive"));
            }
            values.timestep_length = Some(v);
        }
        "cutoff-radius" => {
            let v: f64 = parse_num(text, "cutoff-radius")?;
            if v <= 0.0 {
                return Err(PolymdError::config("cutoff-radius must be positive"));
            }
            values.cutoff_radius = Some(v);
        }
        "epsilon-rf" => {
            values.epsilon_rf = Some(if text == "inf" {
                f64::INFINITY
            } else {
                parse_num(text, "epsilon-rf")?
            });
        }
        "target-temperature" => {
            values.target_temperature = Some(parse_num(text, "target-temperature")?);
        }
        _ => {}
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.parse()
        .map_err(|_| PolymdError::config(format!("invalid {}: '{}'", what, text)))
}
