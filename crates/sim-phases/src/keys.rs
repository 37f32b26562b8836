//! Default property keys

pub const SAT_POS: &str = "sat_pos";
pub const SAT_NW: &str = "sat_nw";
pub const SAT_ISLS: &str = "sat_isls";
pub const FULL_GRID_POS: &str = "full_grid_pos";
pub const GRID_FULL_SZ: &str = "grid_full_sz";
pub const GRID_POS: &str = "grid_pos";
pub const COVERAGE: &str = "coverage";
pub const PATH_DATA: &str = "path_data";
pub const EDGE_DATA: &str = "edge_data";
pub const BW_DATA: &str = "bw_data";
pub const ATK_DATA: &str = "atk_data";
pub const ZONE_ATK_DATA: &str = "zone_atk_data";
