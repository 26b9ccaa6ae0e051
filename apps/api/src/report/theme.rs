use serde::{Deserialize, Serialize};

/// Colour palette applied to an exported report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Palette {
    pub primary: &'static str,
    pub accent: &'static str,
    pub background: &'static str,
    pub text: &'static str,
    pub light_text: &'static str,
    pub border: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportTheme {
    Green,
    Blue,
    #[default]
    Purple,
    Black,
    Grey,
}

impl ReportTheme {
    pub const ALL: [ReportTheme; 5] = [
        ReportTheme::Green,
        ReportTheme::Blue,
        ReportTheme::Purple,
        ReportTheme::Black,
        ReportTheme::Grey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportTheme::Green => "green",
            ReportTheme::Blue => "blue",
            ReportTheme::Purple => "purple",
            ReportTheme::Black => "black",
            ReportTheme::Grey => "grey",
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            ReportTheme::Green => Palette {
                primary: "#28a745",
                accent: "#20c997",
                background: "#f0fdf4",
                text: "#212529",
                light_text: "#495057",
                border: "#d1e7dd",
            },
            ReportTheme::Blue => Palette {
                primary: "#007bff",
                accent: "#17a2b8",
                background: "#e0f7fa",
                text: "#212529",
                light_text: "#495057",
                border: "#b8daff",
            },
            ReportTheme::Purple => Palette {
                primary: "#6f42c1",
                accent: "#9a7fd0",
                background: "#f8f0fc",
                text: "#212529",
                light_text: "#495057",
                border: "#e3d7fa",
            },
            // High contrast
            ReportTheme::Black => Palette {
                primary: "#000000",
                accent: "#343a40",
                background: "#ffffff",
                text: "#000000",
                light_text: "#495057",
                border: "#dee2e6",
            },
            ReportTheme::Grey => Palette {
                primary: "#495057",
                accent: "#6c757d",
                background: "#f8f9fa",
                text: "#212529",
                light_text: "#6c757d",
                border: "#e9ecef",
            },
        }
    }
}
