mod change_view;
mod prepare;
