mod breakpoints;
mod lifecycle;
mod shutdown;
mod stops;
