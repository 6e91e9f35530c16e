use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};

/// Stdout, teed into `path` when one is given.
pub(crate) fn log_writer(
    path: Option<&Path>,
) -> io::Result<impl for<'w> MakeWriter<'w> + Send + Sync + 'static> {
    let file = path.map(File::create).transpose()?.map(Mutex::new);
    Ok(io::stdout.and(file))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn lines_reach_the_log_file() {
        let path = std::env::temp_dir().join(format!("pg-access-bench-{}.log", std::process::id()));
        let writer = log_writer(Some(&path)).unwrap();
        let mut line = writer.make_writer();
        line.write_all(b"Starting Insert row by row\n").unwrap();
        line.flush().unwrap();
        drop(line);

        let logged = std::fs::read_to_string(&path).unwrap();
        assert_eq!(logged, "Starting Insert row by row\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn stdout_only_without_a_path() {
        let writer = log_writer(None).unwrap();
        let mut line = writer.make_writer();
        line.write_all(b"").unwrap();
    }
}
