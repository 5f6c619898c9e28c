//! OME-XML description written into the first directory of each file.

use std::collections::BTreeMap;

use crate::image::{Coordinate, PixelType, SummaryMetadata};

const OME_NAMESPACE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";

/// One plane of the OME grid: where a coordinate's pixels live.
///
/// Filler planes reference the directory index of the image standing in for
/// them, so several planes may share an `ifd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmePlane {
    pub coords: Coordinate,
    /// Zero-based directory index within `file_name`
    pub ifd: u32,
    pub file_name: String,
}

fn ome_pixel_type(pixel_type: PixelType) -> &'static str {
    match pixel_type.bits_per_sample() {
        8 => "uint8",
        _ => "uint16",
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Build the OME-XML document for the planes stored in one file series.
///
/// One `Image` is emitted per stage position present in `planes`.
pub fn build_ome_xml(summary: &SummaryMetadata, planes: &[OmePlane]) -> String {
    let mut by_position: BTreeMap<u32, Vec<&OmePlane>> = BTreeMap::new();
    for plane in planes {
        by_position.entry(plane.coords.position).or_default().push(plane);
    }

    let dimension_order = if summary.slices_first { "XYZCT" } else { "XYCZT" };
    let samples = if summary.pixel_type.is_rgb() { 3 } else { 1 };

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str(&format!("<OME xmlns=\"{}\" Creator=\"acq-pipeline\">", OME_NAMESPACE));

    for (position, mut planes) in by_position {
        planes.sort_by_key(|p| (p.coords.frame, p.coords.slice, p.coords.channel));
        let size_c = planes.iter().map(|p| p.coords.channel + 1).max().unwrap_or(1).max(summary.channels);
        let size_z = planes.iter().map(|p| p.coords.slice + 1).max().unwrap_or(1).max(summary.slices);
        let size_t = planes.iter().map(|p| p.coords.frame + 1).max().unwrap_or(1);

        xml.push_str(&format!(
            "<Image ID=\"Image:{p}\" Name=\"{name}_Pos{p}\"><Pixels ID=\"Pixels:{p}\" \
             DimensionOrder=\"{order}\" Type=\"{ty}\" SizeX=\"{w}\" SizeY=\"{h}\" \
             SizeC=\"{c}\" SizeZ=\"{z}\" SizeT=\"{t}\"",
            p = position,
            name = escape(&summary.prefix),
            order = dimension_order,
            ty = ome_pixel_type(summary.pixel_type),
            w = summary.width,
            h = summary.height,
            c = size_c,
            z = size_z,
            t = size_t,
        ));
        if summary.pixel_size_um > 0.0 {
            xml.push_str(&format!(
                " PhysicalSizeX=\"{0}\" PhysicalSizeY=\"{0}\"",
                summary.pixel_size_um
            ));
        }
        if summary.z_step_um > 0.0 {
            xml.push_str(&format!(" PhysicalSizeZ=\"{}\"", summary.z_step_um));
        }
        xml.push('>');

        for channel in 0..size_c {
            xml.push_str(&format!(
                "<Channel ID=\"Channel:{}:{}\" Name=\"{}\" SamplesPerPixel=\"{}\"/>",
                position,
                channel,
                escape(&summary.channel_name(channel)),
                samples
            ));
        }
        for plane in planes {
            xml.push_str(&format!(
                "<TiffData IFD=\"{}\" FirstC=\"{}\" FirstZ=\"{}\" FirstT=\"{}\" PlaneCount=\"1\">\
                 <UUID FileName=\"{}\"/></TiffData>",
                plane.ifd,
                plane.coords.channel,
                plane.coords.slice,
                plane.coords.frame,
                escape(&plane.file_name)
            ));
        }
        xml.push_str("</Pixels></Image>");
    }

    xml.push_str("</OME>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ome_xml() {
        let mut summary = SummaryMetadata::new(16, 8, PixelType::Gray16).with_dimensions(2, 1, 1, 1);
        summary.prefix = "a<b".into();
        summary.channel_names = vec!["DAPI".into(), "GFP".into()];
        let planes = vec![
            OmePlane { coords: Coordinate::new(1, 0, 0, 0), ifd: 1, file_name: "x.ome.tif".into() },
            OmePlane { coords: Coordinate::new(0, 0, 0, 0), ifd: 0, file_name: "x.ome.tif".into() },
        ];
        let xml = build_ome_xml(&summary, &planes);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("Name=\"a&lt;b_Pos0\""));
        assert!(xml.contains("Type=\"uint16\""));
        assert!(xml.contains("SizeC=\"2\""));
        assert!(xml.contains("Name=\"GFP\""));
        let first = xml.find("FirstC=\"0\"").unwrap();
        let second = xml.find("FirstC=\"1\"").unwrap();
        assert!(first < second);
        assert!(xml.ends_with("</OME>"));
    }

    #[test]
    fn test_one_image_per_position() {
        let summary = SummaryMetadata::new(4, 4, PixelType::Gray8);
        let planes = vec![
            OmePlane { coords: Coordinate::new(0, 0, 0, 0), ifd: 0, file_name: "f".into() },
            OmePlane { coords: Coordinate::new(0, 0, 0, 3), ifd: 1, file_name: "f".into() },
        ];
        let xml = build_ome_xml(&summary, &planes);
        assert_eq!(xml.matches("<Image ").count(), 2);
        assert!(xml.contains("ID=\"Image:3\""));
    }
}
