mod daily_job;
mod helpers;
mod ingest;
mod today;
