mod backfill;
mod file_output;
mod runner;
mod subscription;
