use clap::Parser;
use gridcore::BoundingBox2D;
use std::net::SocketAddr;
use std::time::Duration;

/// Subdivision rules as given on the command line, `"w,h;w,h;..."`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rules(pub Vec<[u32; 2]>);

/// Coordinator for one grid population.
///
/// The service starts a grid worker context, loads the active population
/// into its storage-id record and serves Prometheus metrics until it is
/// asked to stop.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Listen address of the Prometheus metrics server.
    #[arg(long, env = "GRID_METRICS_LISTEN_ADDR", default_value = "0.0.0.0:9092")]
    pub metrics_listen_addr: SocketAddr,

    /// Base URL of the grid store (`{url}/api/topo/...`).
    ///
    /// Without it the worker keeps the population in memory.
    #[arg(long, env = "GRID_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Request timeout for the grid store, in milliseconds.
    #[arg(long, env = "GRID_BACKEND_TIMEOUT_MS", default_value_t = 10_000)]
    pub backend_timeout_ms: u64,

    /// Name of the worker context thread.
    #[arg(long, env = "GRID_WORKER_NAME", default_value = "grid-worker")]
    pub worker_name: String,

    /// Coordinate system of the bounding box.
    #[arg(long, env = "GRID_SRC_CS", default_value = "EPSG:3857")]
    pub src_cs: String,

    /// Coordinate system vertices are produced in.
    #[arg(long, env = "GRID_TARGET_CS", default_value = "EPSG:4326")]
    pub target_cs: String,

    /// Grid extent as `x_min,y_min,x_max,y_max` in the source system.
    #[arg(
        long,
        env = "GRID_BBOX",
        default_value = "12690000,2540000,12720000,2570000",
        value_parser = parse_bbox
    )]
    pub bbox: BoundingBox2D,

    /// Subdivision rules per level, `"w,h;w,h;..."`.
    #[arg(long, env = "GRID_RULES", default_value = "4,4;2,2;2,2;1,1", value_parser = parse_rules)]
    pub rules: Rules,

    /// Upper bound on the number of cells the record holds.
    #[arg(long, env = "GRID_MAX_CELLS", default_value_t = 4096 * 4096)]
    pub max_cells: usize,

    /// Run a short subdivide/merge/topology session after loading.
    #[arg(long, env = "GRID_DEMO", default_value_t = false)]
    pub demo: bool,
}

impl Config {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

fn parse_pair<const N: usize, T: std::str::FromStr>(s: &str) -> Result<[T; N], String>
where
    T::Err: std::fmt::Display,
{
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<T>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let n = parts.len();
    parts
        .try_into()
        .map_err(|_| format!("expected {N} comma-separated values, got {n}"))
}

fn parse_bbox(s: &str) -> Result<BoundingBox2D, String> {
    let [x_min, y_min, x_max, y_max] = parse_pair::<4, f64>(s)?;
    if x_min >= x_max || y_min >= y_max {
        return Err(format!("empty bounding box '{s}'"));
    }
    Ok(BoundingBox2D::new(x_min, y_min, x_max, y_max))
}

fn parse_rules(s: &str) -> Result<Rules, String> {
    s.split(';')
        .filter(|r| !r.trim().is_empty())
        .map(parse_pair::<2, u32>)
        .collect::<Result<Vec<_>, _>>()
        .map(Rules)
}
