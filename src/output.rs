use std::io::Write as _;
use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    /// Renders `rows` in the requested format to the requested destination.
    ///
    /// Each row carries both its table cells and a serde record so that the
    /// table/csv and jsonl outputs can differ in shape.
    pub fn write<R: serde::Serialize>(
        &self,
        headers: &[&'static str],
        rows: impl Iterator<Item = (Vec<String>, R)>,
    ) -> Result<(), Error> {
        let mut io: Box<dyn std::io::Write> = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        match self.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table
                    .set_header(headers.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                for (cells, _) in rows {
                    table.add_row(cells);
                }
                write!(io, "{table}").map_err(|e| self.write_error(e))?;
                writeln!(io).map_err(|e| self.write_error(e))?;
            }
            Format::Jsonl => {
                for (_, record) in rows {
                    serde_json::to_writer(&mut io, &record).map_err(Error::SerializeJson)?;
                    writeln!(io).map_err(|e| self.write_error(e))?;
                }
            }
            Format::Csv => {
                let header_cells = headers.iter().map(|h| (*h).to_owned()).collect::<Vec<_>>();
                self.write_csv_row(&mut io, &header_cells)?;
                for (cells, _) in rows {
                    self.write_csv_row(&mut io, &cells)?;
                }
            }
        }
        io.flush().map_err(|e| self.write_error(e))
    }

    fn write_csv_row(
        &self,
        io: &mut dyn std::io::Write,
        values: &[String],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (idx, value) in values.iter().enumerate() {
            if idx != 0 {
                let (WriteResult::InputEmpty, written) = writer.delimiter(&mut output) else {
                    panic!("something wrong with csv output");
                };
                io.write_all(&output[..written]).map_err(|e| self.write_error(e))?;
            }
            let (WriteResult::InputEmpty, read, written) =
                writer.field(value.as_bytes(), &mut output)
            else {
                panic!("something wrong with csv output");
            };
            assert_eq!(value.len(), read);
            io.write_all(&output[..written]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, written) = writer.terminator(&mut output) else {
            panic!("something wrong with csv output");
        };
        io.write_all(&output[..written]).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }
}
