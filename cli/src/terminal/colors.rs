use colored::Color;

pub const PRIMARY: Color = Color::TrueColor { r: 110, g: 190, b: 255 };
pub const ACCENT: Color = Color::TrueColor { r: 255, g: 175, b: 95 };
pub const SEPARATOR: Color = Color::TrueColor { r: 100, g: 100, b: 100 };
pub const TEXT_DEFAULT: Color = Color::TrueColor { r: 210, g: 210, b: 210 };

pub const IPV4_ADDR: Color = Color::TrueColor { r: 95, g: 215, b: 175 };

pub const GOOD: Color = Color::TrueColor { r: 120, g: 220, b: 120 };
pub const FAIR: Color = Color::TrueColor { r: 240, g: 200, b: 90 };
pub const POOR: Color = Color::TrueColor { r: 235, g: 95, b: 95 };
