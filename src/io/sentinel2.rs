//! Sentinel-2 product reader.
//!
//! A product directory holds an `L1C` and an `L2A` tree. Discovery walks both trees for
//! the band rasters, the `MSK_CLASSI_B00` classification masks and the `MTD_DS.xml` /
//! `MTD_TL.xml` metadata; the XML files are parsed with `quick-xml` for the radiometric
//! constants and the sun zenith grid.
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use ndarray::Array2;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::processing::mask::MaskTriplet;
use crate::io::gdal::{GdalError, GdalRasterReader, project_lat_lon};
use crate::io::source::{ReflectanceProduct, SpectralBand};
use crate::types::{GridGeometry, PixelWindow, ProcessingLevel};

/// Errors encountered when reading Sentinel-2 products
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalError),
    #[error("{level} tree of {product} has no {what}")]
    MissingFile {
        product: String,
        level: ProcessingLevel,
        what: &'static str,
    },
    #[error("Missing field `{0}` in product metadata")]
    MissingField(&'static str),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid product name pattern: {0}")]
    Pattern(regex::Error),
}

static SENSING_TIME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"_(\d{8}T\d{6})"));

/// Sensing timestamp embedded in a product name such as
/// `S2A_MSIL2A_20230616T103031_N0509_R108_T32TPS_20230616T170403`; `None` when the name
/// carries none.
pub fn parse_product_timestamp(name: &str) -> Result<Option<NaiveDateTime>, ProductError> {
    let re = SENSING_TIME.as_ref().map_err(|e| ProductError::Pattern(e.clone()))?;
    Ok(re
        .captures(name)
        .and_then(|caps| NaiveDateTime::parse_from_str(&caps[1], "%Y%m%dT%H%M%S").ok()))
}

/// Files of one product needed by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPaths {
    pub product_id: String,
    pub l1c_nir: PathBuf,
    pub l1c_mask: PathBuf,
    pub l1c_datastrip: PathBuf,
    pub l1c_tile: PathBuf,
    pub l2a_red: PathBuf,
    pub l2a_nir: PathBuf,
    pub l2a_mask: PathBuf,
    pub l2a_datastrip: PathBuf,
}

fn is_raster(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ref e) if e == "jp2" || e == "tif" || e == "tiff"
    )
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn find_file(
    files: &[PathBuf],
    product: &str,
    level: ProcessingLevel,
    what: &'static str,
    pred: &dyn Fn(&Path, &str) -> bool,
) -> Result<PathBuf, ProductError> {
    files
        .iter()
        .find(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            pred(p, &name)
        })
        .cloned()
        .ok_or_else(|| ProductError::MissingFile {
            product: product.to_string(),
            level,
            what,
        })
}

impl ProductPaths {
    /// Locate every required file below `root`.
    pub fn discover(root: &Path) -> Result<Self, ProductError> {
        let product_id = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut l1c = Vec::new();
        walk_files(&root.join(ProcessingLevel::L1C.dir_name()), &mut l1c)?;
        let mut l2a = Vec::new();
        walk_files(&root.join(ProcessingLevel::L2A.dir_name()), &mut l2a)?;

        let path_has = |p: &Path, token: &str| p.to_string_lossy().contains(token);
        let l1c_nir = find_file(&l1c, &product_id, ProcessingLevel::L1C, "IMG_DATA B08 raster", &|p, n| {
            path_has(p, "IMG_DATA") && n.contains("B08") && is_raster(p)
        })?;
        let l1c_mask = find_file(&l1c, &product_id, ProcessingLevel::L1C, "MSK_CLASSI_B00 mask", &|p, n| {
            n.contains("MSK_CLASSI_B00") && is_raster(p)
        })?;
        let l1c_datastrip = find_file(&l1c, &product_id, ProcessingLevel::L1C, "MTD_DS.xml", &|_, n| n == "MTD_DS.xml")?;
        let l1c_tile = find_file(&l1c, &product_id, ProcessingLevel::L1C, "MTD_TL.xml", &|_, n| n == "MTD_TL.xml")?;
        let l2a_red = find_file(&l2a, &product_id, ProcessingLevel::L2A, "10 m B04 raster", &|p, n| {
            path_has(p, "10m") && n.contains("B04") && is_raster(p)
        })?;
        let l2a_nir = find_file(&l2a, &product_id, ProcessingLevel::L2A, "10 m B08 raster", &|p, n| {
            path_has(p, "10m") && n.contains("B08") && is_raster(p)
        })?;
        let l2a_mask = find_file(&l2a, &product_id, ProcessingLevel::L2A, "MSK_CLASSI_B00 mask", &|p, n| {
            n.contains("MSK_CLASSI_B00") && is_raster(p)
        })?;
        let l2a_datastrip = find_file(&l2a, &product_id, ProcessingLevel::L2A, "MTD_DS.xml", &|_, n| n == "MTD_DS.xml")?;

        Ok(Self {
            product_id,
            l1c_nir,
            l1c_mask,
            l1c_datastrip,
            l1c_tile,
            l2a_red,
            l2a_nir,
            l2a_mask,
            l2a_datastrip,
        })
    }
}

/// L2A constants: reflectance = (dn + offset) / quantification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoaCalibration {
    pub quantification: f64,
    pub red_offset: f64,
    pub nir_offset: f64,
}

/// L1C constants for the B08 radiance conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToaCalibration {
    pub quantification: f64,
    pub nir_offset: f64,
    /// Earth-sun distance correction
    pub u: f64,
    /// B08 solar irradiance
    pub solar_irradiance: f64,
}

/// Sun zenith angles from the tile metadata and their spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct ZenithGrid {
    pub values: Array2<f64>,
    pub step_m: Option<f64>,
}

// band_id of B04 and B08 in the datastrip metadata
const RED_BAND_ID: &str = "3";
const NIR_BAND_ID: &str = "7";

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn band_attr(e: &BytesStart) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        let key = a.key.local_name();
        if key.as_ref() == b"band_id" || key.as_ref() == b"bandId" {
            a.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

fn parse_number(txt: &str, field: &'static str) -> Result<f64, ProductError> {
    txt.trim()
        .parse()
        .map_err(|_| ProductError::Parse(format!("{}: {:?} is not a number", field, txt)))
}

/// Parse L2A `MTD_DS.xml` for the BOA quantification value and B04/B08 offsets.
/// Products predating the offsets get 0.
pub fn parse_boa_calibration<R: BufRead>(source: R) -> Result<BoaCalibration, ProductError> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut curr = String::new();
    let mut curr_band: Option<String> = None;
    let mut quantification = None;
    let mut red_offset = None;
    let mut nir_offset = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                curr = tag_name(e);
                curr_band = band_attr(e);
            }
            Event::End(_) => curr.clear(),
            Event::Text(e) => {
                let txt = e.unescape()?;
                match curr.as_str() {
                    "BOA_QUANTIFICATION_VALUE" => {
                        quantification = Some(parse_number(&txt, "BOA_QUANTIFICATION_VALUE")?)
                    }
                    "BOA_ADD_OFFSET" => match curr_band.as_deref() {
                        Some(RED_BAND_ID) => red_offset = Some(parse_number(&txt, "BOA_ADD_OFFSET")?),
                        Some(NIR_BAND_ID) => nir_offset = Some(parse_number(&txt, "BOA_ADD_OFFSET")?),
                        _ => {}
                    },
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if red_offset.is_none() || nir_offset.is_none() {
        debug!("No BOA_ADD_OFFSET for B04/B08, using 0");
    }
    Ok(BoaCalibration {
        quantification: quantification.ok_or(ProductError::MissingField("BOA_QUANTIFICATION_VALUE"))?,
        red_offset: red_offset.unwrap_or(0.0),
        nir_offset: nir_offset.unwrap_or(0.0),
    })
}

/// Parse L1C `MTD_DS.xml` for quantification, B08 offset, U and B08 solar irradiance.
pub fn parse_toa_calibration<R: BufRead>(source: R) -> Result<ToaCalibration, ProductError> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut curr = String::new();
    let mut curr_band: Option<String> = None;
    let mut quantification = None;
    let mut nir_offset = None;
    let mut u = None;
    let mut solar_irradiance = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                curr = tag_name(e);
                curr_band = band_attr(e);
            }
            Event::End(_) => curr.clear(),
            Event::Text(e) => {
                let txt = e.unescape()?;
                let is_nir = curr_band.as_deref() == Some(NIR_BAND_ID);
                match curr.as_str() {
                    "QUANTIFICATION_VALUE" => {
                        quantification = Some(parse_number(&txt, "QUANTIFICATION_VALUE")?)
                    }
                    "RADIO_ADD_OFFSET" if is_nir => {
                        nir_offset = Some(parse_number(&txt, "RADIO_ADD_OFFSET")?)
                    }
                    "U" => u = Some(parse_number(&txt, "U")?),
                    "SOLAR_IRRADIANCE" if is_nir => {
                        solar_irradiance = Some(parse_number(&txt, "SOLAR_IRRADIANCE")?)
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if nir_offset.is_none() {
        debug!("No RADIO_ADD_OFFSET for B08, using 0");
    }
    Ok(ToaCalibration {
        quantification: quantification.ok_or(ProductError::MissingField("QUANTIFICATION_VALUE"))?,
        nir_offset: nir_offset.unwrap_or(0.0),
        u: u.ok_or(ProductError::MissingField("U"))?,
        solar_irradiance: solar_irradiance.ok_or(ProductError::MissingField("SOLAR_IRRADIANCE"))?,
    })
}

/// Parse the `Sun_Angles_Grid/Zenith` block of L1C `MTD_TL.xml`.
pub fn parse_sun_zenith<R: BufRead>(source: R) -> Result<ZenithGrid, ProductError> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut curr = String::new();
    let mut in_sun_grid = false;
    let mut in_zenith = false;
    let mut step_m = None;
    let mut rows: Vec<Vec<f64>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                curr = tag_name(e);
                match curr.as_str() {
                    "Sun_Angles_Grid" => in_sun_grid = true,
                    "Zenith" if in_sun_grid => in_zenith = true,
                    _ => {}
                }
            }
            Event::End(ref e) => {
                match String::from_utf8_lossy(e.local_name().as_ref()).as_ref() {
                    "Sun_Angles_Grid" => in_sun_grid = false,
                    "Zenith" => in_zenith = false,
                    _ => {}
                }
                curr.clear();
            }
            Event::Text(e) if in_zenith => {
                let txt = e.unescape()?;
                match curr.as_str() {
                    "COL_STEP" | "ROW_STEP" => {
                        step_m = Some(parse_number(&txt, "COL_STEP")?);
                    }
                    "VALUES" => {
                        let row = txt
                            .split_whitespace()
                            .map(|v| parse_number(v, "VALUES"))
                            .collect::<Result<Vec<_>, _>>()?;
                        rows.push(row);
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let n_rows = rows.len();
    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if n_rows == 0 || n_cols == 0 {
        return Err(ProductError::MissingField("Sun_Angles_Grid/Zenith/VALUES"));
    }
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(ProductError::Parse("ragged sun zenith grid".into()));
    }
    let values = Array2::from_shape_vec((n_rows, n_cols), rows.into_iter().flatten().collect())
        .map_err(|e| ProductError::Parse(e.to_string()))?;
    Ok(ZenithGrid { values, step_m })
}

fn open_xml(path: &Path) -> Result<std::io::BufReader<fs::File>, ProductError> {
    Ok(std::io::BufReader::new(fs::File::open(path)?))
}

/// A Sentinel-2 product on disk with its band rasters open.
pub struct Sentinel2Product {
    paths: ProductPaths,
    l1c_nir: GdalRasterReader,
    l2a_red: GdalRasterReader,
    l2a_nir: GdalRasterReader,
}

impl Sentinel2Product {
    pub fn open(root: &Path) -> Result<Self, ProductError> {
        let paths = ProductPaths::discover(root)?;
        let l1c_nir = GdalRasterReader::open(&paths.l1c_nir)?;
        let l2a_red = GdalRasterReader::open(&paths.l2a_red)?;
        let l2a_nir = GdalRasterReader::open(&paths.l2a_nir)?;
        if l2a_red.metadata.geotransform != l2a_nir.metadata.geotransform {
            warn!("{}: B04 and B08 geotransforms differ", paths.product_id);
        }
        Ok(Self {
            paths,
            l1c_nir,
            l2a_red,
            l2a_nir,
        })
    }

    pub fn paths(&self) -> &ProductPaths {
        &self.paths
    }
}

impl ReflectanceProduct for Sentinel2Product {
    fn product_id(&self) -> &str {
        &self.paths.product_id
    }

    fn grid(&self, level: ProcessingLevel) -> crate::Result<GridGeometry> {
        Ok(match level {
            ProcessingLevel::L1C => self.l1c_nir.grid(),
            ProcessingLevel::L2A => self.l2a_nir.grid(),
        })
    }

    fn project_site(&self, lat: f64, lon: f64, crs: &str) -> crate::Result<(f64, f64)> {
        Ok(project_lat_lon(lat, lon, crs)?)
    }

    fn read_band(
        &self,
        level: ProcessingLevel,
        band: SpectralBand,
        window: &PixelWindow,
    ) -> crate::Result<Array2<f64>> {
        let reader = match (level, band) {
            (ProcessingLevel::L1C, SpectralBand::Nir) => &self.l1c_nir,
            (ProcessingLevel::L2A, SpectralBand::Red) => &self.l2a_red,
            (ProcessingLevel::L2A, SpectralBand::Nir) => &self.l2a_nir,
            (ProcessingLevel::L1C, SpectralBand::Red) => {
                return Err(crate::Error::Processing(format!(
                    "{}: L1C red band is not used",
                    self.paths.product_id
                )));
            }
        };
        Ok(reader.read_window(1, window)?)
    }

    fn read_mask(&self, level: ProcessingLevel) -> crate::Result<(MaskTriplet, GridGeometry)> {
        let path = match level {
            ProcessingLevel::L1C => &self.paths.l1c_mask,
            ProcessingLevel::L2A => &self.paths.l2a_mask,
        };
        let reader = GdalRasterReader::open(path)?;
        if reader.metadata.bands < 3 {
            return Err(GdalError::UnsupportedFormat(format!(
                "{:?} has {} bands, expected 3",
                path, reader.metadata.bands
            ))
            .into());
        }
        let mask = MaskTriplet::new(
            reader.read_band_u8(1)?,
            reader.read_band_u8(2)?,
            reader.read_band_u8(3)?,
        )?;
        Ok((mask, reader.grid()))
    }

    fn boa_calibration(&self) -> crate::Result<BoaCalibration> {
        Ok(parse_boa_calibration(open_xml(&self.paths.l2a_datastrip)?)?)
    }

    fn toa_calibration(&self) -> crate::Result<ToaCalibration> {
        Ok(parse_toa_calibration(open_xml(&self.paths.l1c_datastrip)?)?)
    }

    fn sun_zenith(&self) -> crate::Result<ZenithGrid> {
        Ok(parse_sun_zenith(open_xml(&self.paths.l1c_tile)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const L2A_DS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-2A_DataStrip_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-2A_Datastrip_Metadata.xsd">
  <n1:Image_Data_Info>
    <Radiometric_Info>
      <QUANTIFICATION_VALUES_LIST>
        <BOA_QUANTIFICATION_VALUE unit="none">10000</BOA_QUANTIFICATION_VALUE>
        <AOT_QUANTIFICATION_VALUE unit="none">1000.0</AOT_QUANTIFICATION_VALUE>
      </QUANTIFICATION_VALUES_LIST>
      <BOA_ADD_OFFSET_VALUES_LIST>
        <BOA_ADD_OFFSET band_id="2">-1000</BOA_ADD_OFFSET>
        <BOA_ADD_OFFSET band_id="3">-1000</BOA_ADD_OFFSET>
        <BOA_ADD_OFFSET band_id="7">-900</BOA_ADD_OFFSET>
      </BOA_ADD_OFFSET_VALUES_LIST>
    </Radiometric_Info>
  </n1:Image_Data_Info>
</n1:Level-2A_DataStrip_ID>"#;

    const L1C_DS: &str = r#"<Level-1C_DataStrip_ID>
  <Product_Image_Characteristics>
    <QUANTIFICATION_VALUE unit="none">10000</QUANTIFICATION_VALUE>
    <Reflectance_Conversion>
      <U>0.968</U>
      <Solar_Irradiance_List>
        <SOLAR_IRRADIANCE bandId="3" unit="W/m²/µm">1512.79</SOLAR_IRRADIANCE>
        <SOLAR_IRRADIANCE bandId="7" unit="W/m²/µm">1041.63</SOLAR_IRRADIANCE>
      </Solar_Irradiance_List>
    </Reflectance_Conversion>
    <Radiometric_Offset_List>
      <RADIO_ADD_OFFSET band_id="7">-1000</RADIO_ADD_OFFSET>
    </Radiometric_Offset_List>
  </Product_Image_Characteristics>
</Level-1C_DataStrip_ID>"#;

    const L1C_TL: &str = r#"<Level-1C_Tile_ID>
  <Geometric_Info>
    <Tile_Angles>
      <Sun_Angles_Grid>
        <Zenith>
          <COL_STEP unit="m">5000</COL_STEP>
          <ROW_STEP unit="m">5000</ROW_STEP>
          <Values_List>
            <VALUES>30.1 30.2 30.3</VALUES>
            <VALUES>31.1 31.2 31.3</VALUES>
          </Values_List>
        </Zenith>
        <Azimuth>
          <COL_STEP unit="m">5000</COL_STEP>
          <Values_List><VALUES>150 151 152</VALUES></Values_List>
        </Azimuth>
      </Sun_Angles_Grid>
      <Viewing_Incidence_Angles_Grids bandId="0" detectorId="1">
        <Zenith>
          <Values_List><VALUES>NaN 5.0 5.1</VALUES></Values_List>
        </Zenith>
      </Viewing_Incidence_Angles_Grids>
    </Tile_Angles>
  </Geometric_Info>
</Level-1C_Tile_ID>"#;

    #[test]
    fn boa_calibration_reads_red_and_nir_offsets() {
        let cal = parse_boa_calibration(L2A_DS.as_bytes()).unwrap();
        assert_abs_diff_eq!(cal.quantification, 10000.0);
        assert_abs_diff_eq!(cal.red_offset, -1000.0);
        assert_abs_diff_eq!(cal.nir_offset, -900.0);
    }

    #[test]
    fn toa_calibration_reads_band_7_values() {
        let cal = parse_toa_calibration(L1C_DS.as_bytes()).unwrap();
        assert_abs_diff_eq!(cal.quantification, 10000.0);
        assert_abs_diff_eq!(cal.nir_offset, -1000.0);
        assert_abs_diff_eq!(cal.u, 0.968);
        assert_abs_diff_eq!(cal.solar_irradiance, 1041.63);
    }

    #[test]
    fn sun_zenith_ignores_other_grids() {
        let grid = parse_sun_zenith(L1C_TL.as_bytes()).unwrap();
        assert_eq!(grid.values.dim(), (2, 3));
        assert_abs_diff_eq!(grid.values[[1, 2]], 31.3);
        assert_eq!(grid.step_m, Some(5000.0));
    }

    #[test]
    fn missing_quantification_is_an_error() {
        let xml = "<root><BOA_ADD_OFFSET band_id=\"3\">0</BOA_ADD_OFFSET></root>";
        assert!(matches!(
            parse_boa_calibration(xml.as_bytes()),
            Err(ProductError::MissingField("BOA_QUANTIFICATION_VALUE"))
        ));
    }

    #[test]
    fn product_timestamp_comes_from_the_name() {
        assert!(SENSING_TIME.is_ok());
        let ts = parse_product_timestamp("S2A_MSIL2A_20230616T103031_N0509_R108_T32TPS_20230616T170403")
            .unwrap()
            .unwrap();
        assert_eq!(ts.to_string(), "2023-06-16 10:30:31");
        assert!(parse_product_timestamp("not_a_product").unwrap().is_none());
    }

    #[test]
    fn discovery_names_the_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("S2B_MSIL2A_20230615T103029_N0509");
        let img = root.join("L1C/GRANULE/T32/IMG_DATA");
        fs::create_dir_all(&img).unwrap();
        fs::write(img.join("T32TPS_20230615T103029_B08.jp2"), b"").unwrap();
        fs::create_dir_all(root.join("L2A")).unwrap();
        let err = ProductPaths::discover(&root).unwrap_err();
        assert!(matches!(
            err,
            ProductError::MissingFile { level: ProcessingLevel::L1C, what: "MSK_CLASSI_B00 mask", .. }
        ));
    }
}
